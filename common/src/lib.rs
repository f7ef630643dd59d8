pub mod config;
pub mod connectivity;
pub mod error;
pub mod http;
pub mod identity;
pub mod manifest;
pub mod node;
pub mod ota;
pub mod panel;
pub mod platform;
pub mod reporter;
pub mod retry;
pub mod routes;
pub mod scheduler;
pub mod transport;
pub mod types;
pub mod uplink;

#[cfg(test)]
pub(crate) mod testing;

pub use config::{DeviceContext, NodeConfig, WifiCredentials, FIRMWARE_VERSION, MODEL_TYPE};
pub use connectivity::ConnectivityManager;
pub use error::{HttpError, RadioError, StorageError, UpdateError};
pub use http::{HttpClient, HttpRequest, HttpResponse};
pub use manifest::FirmwareManifest;
pub use node::{Node, NodeControl};
pub use ota::{StorageSession, UpdateOrchestrator, UpdateOutcome};
pub use panel::{NodeStatus, ReadingView, WifiSettingsUpdate, WifiSettingsView};
pub use platform::{
    Clock, CredentialStore, Display, LinkStatus, LogDisplay, SensorSource, SystemClock, Transport,
    UpdateStorage, WifiRadio,
};
pub use reporter::Reporter;
pub use retry::{Backoff, FixedBackoff, NoBackoff, RetryPolicy};
pub use routes::*;
pub use scheduler::{NodeAction, NodeScheduler};
pub use transport::TcpTransport;
pub use types::{
    BatteryCurve, BatteryStatus, ConnectionState, DisplayState, DownloadProgress, SensorReading,
    UpdateState,
};
pub use uplink::Uplink;
