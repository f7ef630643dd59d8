use crate::{config::ScheduleConfig, types::ConnectionState};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeAction {
    Reconnect,
    SendReading,
    LogBattery,
    CheckForUpdate,
    /// The link has been down past the grace period; reboot the node.
    Restart,
}

/// Periodic work of the node loop. Pure: the caller supplies time and link
/// state and executes the returned actions in order.
#[derive(Debug, Clone)]
pub struct NodeScheduler {
    config: ScheduleConfig,
    last_reading_ms: Option<u64>,
    last_battery_log_ms: Option<u64>,
    last_update_check_ms: Option<u64>,
    disconnected_since_ms: Option<u64>,
}

impl NodeScheduler {
    pub fn new(config: ScheduleConfig) -> Self {
        Self {
            config,
            last_reading_ms: None,
            last_battery_log_ms: None,
            last_update_check_ms: None,
            disconnected_since_ms: None,
        }
    }

    /// Records the boot-time update check so the next one is a full
    /// interval away.
    pub fn mark_update_checked(&mut self, now_ms: u64) {
        self.last_update_check_ms = Some(now_ms);
    }

    pub fn tick(&mut self, now_ms: u64, link: ConnectionState) -> Vec<NodeAction> {
        let mut actions = Vec::new();
        let connected = link == ConnectionState::Connected;

        if connected {
            self.disconnected_since_ms = None;
        } else {
            let since = *self.disconnected_since_ms.get_or_insert(now_ms);
            if now_ms.saturating_sub(since) > self.config.wifi_restart_grace_ms {
                return vec![NodeAction::Restart];
            }
            actions.push(NodeAction::Reconnect);
        }

        if connected && due(self.last_reading_ms, self.config.reading_interval_ms, now_ms) {
            self.last_reading_ms = Some(now_ms);
            actions.push(NodeAction::SendReading);
        }

        if due(self.last_battery_log_ms, self.config.battery_log_interval_ms, now_ms) {
            self.last_battery_log_ms = Some(now_ms);
            actions.push(NodeAction::LogBattery);
        }

        if connected
            && due(
                self.last_update_check_ms,
                self.config.update_check_interval_ms,
                now_ms,
            )
        {
            self.last_update_check_ms = Some(now_ms);
            actions.push(NodeAction::CheckForUpdate);
        }

        actions
    }
}

fn due(last_ms: Option<u64>, interval_ms: u64, now_ms: u64) -> bool {
    last_ms.map_or(true, |last| now_ms.saturating_sub(last) >= interval_ms)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::types::ConnectionState::{Connected, Disconnected};

    fn scheduler() -> NodeScheduler {
        NodeScheduler::new(ScheduleConfig::default())
    }

    #[test]
    fn first_tick_runs_everything() {
        let mut scheduler = scheduler();
        assert_eq!(
            scheduler.tick(0, Connected),
            vec![
                NodeAction::SendReading,
                NodeAction::LogBattery,
                NodeAction::CheckForUpdate
            ]
        );
    }

    #[test]
    fn intervals_are_respected() {
        let mut scheduler = scheduler();
        scheduler.mark_update_checked(0);

        assert_eq!(
            scheduler.tick(0, Connected),
            vec![NodeAction::SendReading, NodeAction::LogBattery]
        );
        assert!(scheduler.tick(9_999, Connected).is_empty());
        assert_eq!(
            scheduler.tick(10_000, Connected),
            vec![NodeAction::SendReading, NodeAction::LogBattery]
        );
        assert!(scheduler
            .tick(3_600_000, Connected)
            .contains(&NodeAction::CheckForUpdate));
    }

    #[test]
    fn disconnected_link_reconnects_and_defers_network_work() {
        let mut scheduler = scheduler();

        assert_eq!(
            scheduler.tick(0, Disconnected),
            vec![NodeAction::Reconnect, NodeAction::LogBattery]
        );
        assert_eq!(
            scheduler.tick(1_000, Connected),
            vec![NodeAction::SendReading, NodeAction::CheckForUpdate]
        );
    }

    #[test]
    fn restarts_after_grace_period_without_link() {
        let mut scheduler = scheduler();

        scheduler.tick(1_000, Disconnected);
        assert_eq!(
            scheduler.tick(301_000, Disconnected),
            vec![NodeAction::Reconnect, NodeAction::LogBattery]
        );
        assert_eq!(
            scheduler.tick(301_001, Disconnected),
            vec![NodeAction::Restart]
        );
    }

    #[test]
    fn recovered_link_resets_restart_timer() {
        let mut scheduler = scheduler();

        scheduler.tick(0, Disconnected);
        scheduler.tick(200_000, Connected);
        scheduler.tick(250_000, Disconnected);

        assert!(!scheduler
            .tick(500_000, Disconnected)
            .contains(&NodeAction::Restart));
    }
}
