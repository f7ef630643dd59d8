use std::fmt::Write as _;

use log::{debug, error, info, warn};
use sha2::{Digest, Sha256};

use crate::{
    config::{ApiRoutes, DeviceContext, NodeConfig, OtaConfig},
    error::UpdateError,
    manifest::FirmwareManifest,
    platform::{Clock, Display, Transport, UpdateStorage, WifiRadio},
    routes::with_query,
    types::{DisplayState, DownloadProgress, SessionState, UpdateState, UpdateStatusPayload},
    uplink::Uplink,
};

/// Exclusive handle on an update image being written. Dropping a session
/// that was neither committed nor aborted aborts it, so an early return from
/// any stage releases the storage.
pub struct StorageSession<'a, S: UpdateStorage> {
    storage: &'a mut S,
    state: SessionState,
}

impl<'a, S: UpdateStorage> StorageSession<'a, S> {
    pub fn open(storage: &'a mut S, size: u32) -> Result<Self, UpdateError> {
        storage.open(size).map_err(UpdateError::StorageOpen)?;
        Ok(Self {
            storage,
            state: SessionState::Open,
        })
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn write(&mut self, bytes: &[u8]) -> Result<(), UpdateError> {
        let written = self.storage.write(bytes);
        if written != bytes.len() {
            return Err(UpdateError::StorageWrite {
                expected: bytes.len(),
                actual: written,
            });
        }
        Ok(())
    }

    pub fn commit(mut self) -> Result<(), UpdateError> {
        self.storage.commit().map_err(UpdateError::StorageCommit)?;
        self.state = SessionState::Committed;
        Ok(())
    }

    pub fn abort(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if self.state == SessionState::Open {
            self.storage.abort();
            self.state = SessionState::Aborted;
            warn!("Update storage session aborted");
        }
    }
}

impl<S: UpdateStorage> Drop for StorageSession<'_, S> {
    fn drop(&mut self) {
        self.release();
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateOutcome {
    UpToDate { message: Option<String> },
    Applied { version: String, bytes: u32 },
}

pub struct UpdateOrchestrator<S, D, C> {
    storage: S,
    display: D,
    clock: C,
    context: DeviceContext,
    routes: ApiRoutes,
    ota: OtaConfig,
    download_ceiling_ms: u64,
    idle_poll_ms: u64,
    state: UpdateState,
}

impl<S, D, C> UpdateOrchestrator<S, D, C>
where
    S: UpdateStorage,
    D: Display,
    C: Clock,
{
    pub fn new(
        storage: S,
        display: D,
        clock: C,
        context: DeviceContext,
        config: &NodeConfig,
    ) -> Self {
        Self {
            storage,
            display,
            clock,
            context,
            routes: config.routes.clone(),
            ota: config.ota.clone(),
            download_ceiling_ms: config.download_ceiling_ms(),
            idle_poll_ms: config.http.idle_poll_ms,
            state: UpdateState::Idle,
        }
    }

    pub fn state(&self) -> UpdateState {
        self.state
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    /// Any failure releases the storage session and leaves the orchestrator
    /// back in `Idle`.
    pub fn check_for_update<R, T, UC, UD>(
        &mut self,
        uplink: &mut Uplink<R, T, UC, UD>,
    ) -> Result<UpdateOutcome, UpdateError>
    where
        R: WifiRadio,
        T: Transport,
        UC: Clock,
        UD: Display,
    {
        if self.state != UpdateState::Idle {
            warn!("Update check rejected while {}", self.state.as_str());
            return Err(UpdateError::Busy(self.state));
        }

        match self.attempt(uplink) {
            Ok(outcome) => Ok(outcome),
            Err(err) => {
                enter(&mut self.state, UpdateState::Failed);
                error!("Firmware update failed: {err}");
                self.display.show(DisplayState::Sad);
                enter(&mut self.state, UpdateState::Idle);
                Err(err)
            }
        }
    }

    fn attempt<R, T, UC, UD>(
        &mut self,
        uplink: &mut Uplink<R, T, UC, UD>,
    ) -> Result<UpdateOutcome, UpdateError>
    where
        R: WifiRadio,
        T: Transport,
        UC: Clock,
        UD: Display,
    {
        enter(&mut self.state, UpdateState::CheckingManifest);
        info!(
            "Checking for firmware update (current {})",
            self.context.firmware_version
        );

        let check_path = with_query(
            &self.routes.firmware_check,
            &[
                ("deviceId", self.context.device_id.as_str()),
                ("currentVersion", self.context.firmware_version.as_str()),
                ("modelType", self.context.model_type.as_str()),
            ],
        );
        let response = uplink.get(&check_path)?;
        if response.status != 200 {
            return Err(UpdateError::UnexpectedStatus(response.status));
        }

        let manifest = FirmwareManifest::parse(&response.body_text(), &self.context, &self.routes)?;
        if !manifest.update_available {
            match &manifest.message {
                Some(message) => info!("No update available: {message}"),
                None => info!("No update available"),
            }
            self.display.show(DisplayState::Happy);
            enter(&mut self.state, UpdateState::Idle);
            return Ok(UpdateOutcome::UpToDate {
                message: manifest.message,
            });
        }

        info!(
            "Update available: {} -> {} ({} bytes)",
            self.context.firmware_version, manifest.version, manifest.size_bytes
        );
        self.display.show(DisplayState::UpdateAvailable);
        self.clock.sleep_ms(self.ota.announce_delay_ms);

        let digest = self.download(uplink, &manifest)?;

        enter(&mut self.state, UpdateState::Applying);
        info!(
            "Firmware {} committed ({} bytes, sha256 {digest})",
            manifest.version, manifest.size_bytes
        );
        self.notify_applying(uplink, &manifest.version);
        self.clock.sleep_ms(self.ota.apply_delay_ms);
        self.storage.apply();

        Ok(UpdateOutcome::Applied {
            version: manifest.version,
            bytes: manifest.size_bytes,
        })
    }

    fn download<R, T, UC, UD>(
        &mut self,
        uplink: &mut Uplink<R, T, UC, UD>,
        manifest: &FirmwareManifest,
    ) -> Result<String, UpdateError>
    where
        R: WifiRadio,
        T: Transport,
        UC: Clock,
        UD: Display,
    {
        enter(&mut self.state, UpdateState::Downloading);
        self.display.show(DisplayState::UpdateInitializing);
        let stage_start = self.clock.now_ms();
        let total = manifest.size_bytes;

        let mut session = StorageSession::open(&mut self.storage, total)?;
        let mut stream = uplink.open_get(&manifest.download_path)?;
        if stream.status() != 200 {
            return Err(UpdateError::UnexpectedStatus(stream.status()));
        }
        if let Some(length) = stream.headers().content_length() {
            if length != total as usize {
                warn!("Download Content-Length {length} differs from manifest size {total}");
            }
        }

        let step = self.ota.progress_step_pct.max(1);
        let mut next_report = step;
        let mut progress = DownloadProgress::new(total, self.clock.now_ms());
        let mut hasher = Sha256::new();
        let mut buf = vec![0_u8; self.ota.chunk_size.max(1)];

        while !progress.is_complete() {
            let now = self.clock.now_ms();
            if now.saturating_sub(stage_start) > self.download_ceiling_ms {
                return Err(UpdateError::Timeout(self.download_ceiling_ms));
            }
            if now.saturating_sub(progress.last_progress_at) > self.ota.stall_timeout_ms {
                return Err(UpdateError::Stalled(self.ota.stall_timeout_ms));
            }

            let want = buf.len().min(progress.remaining() as usize);
            let read = stream.read_available(&mut buf[..want]);
            if read == 0 {
                if !stream.is_open() {
                    return Err(UpdateError::Incomplete {
                        written: progress.bytes_written,
                        total,
                    });
                }
                self.clock.sleep_ms(self.idle_poll_ms);
                continue;
            }

            session.write(&buf[..read])?;
            hasher.update(&buf[..read]);
            progress.advance(read as u32, self.clock.now_ms());

            let pct = progress.percent();
            while next_report < 100 && next_report <= pct {
                self.display.show(DisplayState::UpdateProgress(next_report));
                next_report = next_report.saturating_add(step);
            }
        }

        if stream.read_available(&mut buf) > 0 {
            warn!("Discarding bytes beyond declared size {total}");
        }
        drop(stream);

        self.display.show(DisplayState::UpdateProgress(100));
        enter(&mut self.state, UpdateState::Finalizing);

        let digest = hex(&hasher.finalize());
        if let Some(expected) = &manifest.sha256 {
            if *expected != digest {
                return Err(UpdateError::DigestMismatch {
                    expected: expected.clone(),
                    actual: digest,
                });
            }
        }

        session.commit()?;
        Ok(digest)
    }

    fn notify_applying<R, T, UC, UD>(&self, uplink: &mut Uplink<R, T, UC, UD>, target_version: &str)
    where
        R: WifiRadio,
        T: Transport,
        UC: Clock,
        UD: Display,
    {
        let payload = UpdateStatusPayload {
            device_id: self.context.device_id.clone(),
            model_type: self.context.model_type.clone(),
            firmware_version: self.context.firmware_version.clone(),
            target_version: target_version.to_string(),
            status: "applying".to_string(),
        };
        let body = match serde_json::to_vec(&payload) {
            Ok(body) => body,
            Err(err) => {
                warn!("Failed to encode update status: {err}");
                return;
            }
        };

        match uplink.post_json(&self.routes.register, &body) {
            Ok(response) if response.is_success() => info!("Update status sent"),
            Ok(response) => warn!("Update status rejected with HTTP {}", response.status),
            Err(err) => warn!("Update status not sent: {err}"),
        }
    }
}

fn enter(state: &mut UpdateState, next: UpdateState) {
    debug!("Update state {} -> {}", state.as_str(), next.as_str());
    *state = next;
}

fn hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        let _ = write!(&mut out, "{byte:02x}");
    }
    out
}
