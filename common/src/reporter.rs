use log::{error, info, warn};
use serde::Serialize;

use crate::{
    config::{ApiRoutes, DeviceContext},
    platform::{Clock, Display, Transport, WifiRadio},
    retry::RetryPolicy,
    types::{DisplayState, ReadingPayload, RegisterPayload, SensorReading},
    uplink::Uplink,
};

/// The data-POST path: registration and periodic readings, each sent through
/// the retry policy with reconnect between attempts.
pub struct Reporter {
    retry: RetryPolicy,
    context: DeviceContext,
    routes: ApiRoutes,
}

impl Reporter {
    pub fn new(retry: RetryPolicy, context: DeviceContext, routes: ApiRoutes) -> Self {
        Self {
            retry,
            context,
            routes,
        }
    }

    pub fn context(&self) -> &DeviceContext {
        &self.context
    }

    pub fn register<R, T, C, D>(&mut self, uplink: &mut Uplink<R, T, C, D>) -> bool
    where
        R: WifiRadio,
        T: Transport,
        C: Clock,
        D: Display,
    {
        info!("Registering device {}", self.context.device_id);
        let payload = RegisterPayload::from_context(&self.context);
        let route = self.routes.register.clone();
        self.post_json_with_retry(uplink, &route, &payload)
    }

    pub fn send_reading<R, T, C, D>(
        &mut self,
        uplink: &mut Uplink<R, T, C, D>,
        reading: &SensorReading,
        timestamp: i64,
    ) -> bool
    where
        R: WifiRadio,
        T: Transport,
        C: Clock,
        D: Display,
    {
        let Some(payload) = ReadingPayload::build(&self.context, reading, timestamp) else {
            error!("Sensor reading unavailable, nothing sent");
            uplink.display().show(DisplayState::Sad);
            return false;
        };

        info!(
            "Sending reading: {:.1} C, {:.1} %",
            payload.temperature, payload.humidity
        );
        let route = self.routes.readings.clone();
        self.post_json_with_retry(uplink, &route, &payload)
    }

    fn post_json_with_retry<R, T, C, D, P>(
        &mut self,
        uplink: &mut Uplink<R, T, C, D>,
        path: &str,
        payload: &P,
    ) -> bool
    where
        R: WifiRadio,
        T: Transport,
        C: Clock,
        D: Display,
        P: Serialize,
    {
        let body = match serde_json::to_vec(payload) {
            Ok(body) => body,
            Err(err) => {
                error!("Failed to encode payload for {path}: {err}");
                uplink.display().show(DisplayState::Sad);
                return false;
            }
        };

        let retries = self.retry.max_attempts().saturating_sub(1);
        let sent = self.retry.execute(
            &mut *uplink,
            |uplink, _| match uplink.post_json(path, &body) {
                Ok(response) if response.is_success() => {
                    info!("POST {path} -> {}", response.status);
                    true
                }
                Ok(response) => {
                    warn!("POST {path} -> {}: {}", response.status, response.body_text());
                    false
                }
                Err(err) => {
                    warn!("POST {path} failed: {err}");
                    false
                }
            },
            |uplink, attempt| {
                info!("Retry attempt {attempt} of {retries}");
                uplink.display().show(DisplayState::Retry);
                if uplink.is_connected() {
                    return true;
                }
                uplink.display().show(DisplayState::Sad);
                if uplink.reconnect() {
                    return true;
                }
                error!("Reconnect failed, abandoning POST {path}");
                false
            },
        );

        if sent {
            uplink.display().show(DisplayState::Happy);
        } else {
            error!("POST {path} failed after retries");
            uplink.display().show(DisplayState::Sad);
        }
        sent
    }
}
