use std::{collections::BTreeMap, sync::Arc};

use infrastructure::EventEmitter;
use tokio::sync::{Mutex, MutexGuard};

use crate::{
    core::{ChannelId, Pin, time::DateTime, time::Duration},
    hardware::{Level, OutputDriver},
    relay::{AllStates, ChannelSnapshot, ChannelState, RelayError, RelayEvent, RelayState, SwitchResult, SwitchStatus},
};

struct Channel {
    pin: Pin,
    state: RelayState,
    last_changed_at: DateTime,
}

#[derive(Default)]
struct RelayBank {
    channels: BTreeMap<ChannelId, Channel>,
}

impl RelayBank {
    fn channel_mut(&mut self, channel_id: ChannelId) -> Result<&mut Channel, RelayError> {
        self.channels
            .get_mut(&channel_id)
            .ok_or(RelayError::UnknownChannel { channel_id })
    }
}

pub struct RelayEngine {
    bank: Mutex<RelayBank>,
    driver: Arc<dyn OutputDriver>,
    active_low: bool,
    lock_timeout: Duration,
    playtime_step: Duration,
    event_tx: EventEmitter<RelayEvent>,
}

impl RelayEngine {
    pub fn new(
        driver: Arc<dyn OutputDriver>,
        active_low: bool,
        lock_timeout: Duration,
        playtime_step: Duration,
        event_tx: EventEmitter<RelayEvent>,
    ) -> Self {
        Self {
            bank: Mutex::new(RelayBank::default()),
            driver,
            active_low,
            lock_timeout,
            playtime_step,
            event_tx,
        }
    }

    /// Aligns the bank with the pin map. New channels and channels moved to another pin are
    /// configured as outputs and driven to disengaged. Pins no longer used by a channel are
    /// released in the disengaged level.
    pub async fn sync_channels(&self, pin_map: &BTreeMap<ChannelId, Pin>) -> Result<(), RelayError> {
        let mut bank = self.lock().await?;

        let released: Vec<(ChannelId, Pin)> = bank
            .channels
            .iter()
            .filter(|(id, channel)| pin_map.get(*id) != Some(&channel.pin))
            .map(|(id, channel)| (*id, channel.pin))
            .collect();

        for (channel_id, pin) in released {
            if let Err(e) = self.driver.write(pin, self.level_for(RelayState::Disengaged)) {
                tracing::error!("Error releasing {} of channel {}: {:?}", pin, channel_id, e);
            }

            tracing::info!("Channel {} released {}", channel_id, pin);
            bank.channels.remove(&channel_id);
        }

        for (channel_id, pin) in pin_map {
            if bank.channels.contains_key(channel_id) {
                continue;
            }

            if let Err(e) = self.driver.setup_output(*pin) {
                tracing::error!("Error configuring {} for channel {}: {:?}", pin, channel_id, e);
            } else if let Err(e) = self.driver.write(*pin, self.level_for(RelayState::Disengaged)) {
                tracing::error!("Error initializing channel {} to disengaged: {:?}", channel_id, e);
            }

            tracing::info!("Channel {} initialized on {}", channel_id, pin);

            bank.channels.insert(
                *channel_id,
                Channel {
                    pin: *pin,
                    state: RelayState::Disengaged,
                    last_changed_at: DateTime::now(),
                },
            );
        }

        Ok(())
    }

    pub async fn get_state(&self, channel_id: ChannelId) -> Result<ChannelState, RelayError> {
        let mut bank = self.lock().await?;
        let channel = bank.channel_mut(channel_id)?;

        Ok(ChannelState {
            channel_id,
            state: channel.state,
            timestamp: DateTime::now(),
        })
    }

    pub async fn set_state(&self, channel_id: ChannelId, desired: RelayState) -> Result<SwitchResult, RelayError> {
        let mut bank = self.lock().await?;
        self.switch(&mut bank, channel_id, desired)
    }

    pub async fn toggle(&self, channel_id: ChannelId) -> Result<SwitchResult, RelayError> {
        let mut bank = self.lock().await?;
        let desired = !bank.channel_mut(channel_id)?.state;
        self.switch(&mut bank, channel_id, desired)
    }

    pub async fn get_all_states(&self) -> Result<AllStates, RelayError> {
        let bank = self.lock().await?;

        let channels = bank
            .channels
            .iter()
            .map(|(channel_id, channel)| ChannelSnapshot {
                channel_id: *channel_id,
                physical_pin: channel.pin,
                state: channel.state,
                last_changed_at: channel.last_changed_at,
            })
            .collect();

        Ok(AllStates {
            channels,
            timestamp: DateTime::now(),
        })
    }

    /// Engages every channel, then disengages every channel, one step at a time.
    /// The bank stays locked for the whole sequence. A failing channel does not stop the
    /// sequence, the disengage pass always runs. Failures are reported once it is complete.
    pub async fn run_playtime(&self) -> Result<String, RelayError> {
        let mut bank = self.lock().await?;
        let channel_ids: Vec<ChannelId> = bank.channels.keys().copied().collect();

        tracing::info!("Starting playtime on {} channels", channel_ids.len());

        let mut failed: Vec<(ChannelId, String)> = vec![];
        for state in [RelayState::Engaged, RelayState::Disengaged] {
            for channel_id in &channel_ids {
                if let Err(e) = self.switch(&mut bank, *channel_id, state) {
                    failed.push((*channel_id, e.to_string()));
                }
                tokio::time::sleep(self.playtime_step.into()).await;
            }
        }

        let Some((first_failed, _)) = failed.first() else {
            tracing::info!("Playtime done");
            return Ok("Playtime done. Hope you enjoyed it.".to_string());
        };

        let messages: Vec<String> = failed.iter().map(|(_, message)| message.clone()).collect();
        tracing::error!("Playtime finished with {} failed steps", failed.len());

        Err(RelayError::Hardware {
            channel_id: *first_failed,
            message: format!("Playtime incomplete: {}", messages.join("; ")),
        })
    }

    async fn lock(&self) -> Result<MutexGuard<'_, RelayBank>, RelayError> {
        tokio::time::timeout(self.lock_timeout.into(), self.bank.lock())
            .await
            .map_err(|_| {
                tracing::warn!("Relay bank lock not acquired within {}", self.lock_timeout);
                RelayError::EngineBusy {
                    timeout: self.lock_timeout,
                }
            })
    }

    //caller must hold the bank lock, write and read-back happen without interruption
    fn switch(&self, bank: &mut RelayBank, channel_id: ChannelId, desired: RelayState) -> Result<SwitchResult, RelayError> {
        let channel = bank.channel_mut(channel_id)?;
        let previous_state = channel.state;

        self.driver
            .write(channel.pin, self.level_for(desired))
            .map_err(|e| {
                tracing::error!("Error switching channel {} to {}: {:?}", channel_id, desired, e);
                RelayError::Hardware {
                    channel_id,
                    message: format!("{:#}", e),
                }
            })?;

        let timestamp = DateTime::now();
        channel.state = desired;
        if previous_state != desired {
            channel.last_changed_at = timestamp;
        }

        let confirmed_state = match self.driver.read(channel.pin) {
            Ok(level) => Some(self.state_for(level)),
            Err(e) => {
                tracing::error!("Error reading back channel {}: {:?}", channel_id, e);
                None
            }
        };

        let status = if confirmed_state == Some(desired) {
            SwitchStatus::Confirmed
        } else {
            tracing::warn!(
                "Hardware mismatch on channel {}: commanded {}, read back {:?}",
                channel_id,
                desired,
                confirmed_state
            );
            SwitchStatus::HardwareMismatch
        };

        let result = SwitchResult {
            channel_id,
            previous_state,
            new_state: desired,
            confirmed_state,
            timestamp,
            status,
        };

        tracing::info!("Channel {} switched from {} to {}", channel_id, previous_state, desired);
        infrastructure::meter::increment("relay_switched", &[("channel", &channel_id.to_string())]);

        if previous_state != desired {
            self.event_tx.send(RelayEvent::StateChanged(result.clone()));
        }

        Ok(result)
    }

    fn level_for(&self, state: RelayState) -> Level {
        match (state, self.active_low) {
            (RelayState::Engaged, true) | (RelayState::Disengaged, false) => Level::Low,
            (RelayState::Engaged, false) | (RelayState::Disengaged, true) => Level::High,
        }
    }

    fn state_for(&self, level: Level) -> RelayState {
        match (level, self.active_low) {
            (Level::Low, true) | (Level::High, false) => RelayState::Engaged,
            (Level::High, true) | (Level::Low, false) => RelayState::Disengaged,
        }
    }
}

#[cfg(test)]
mod tests {
    use infrastructure::EventBus;

    use super::*;
    use crate::{hardware::SimulatedGpio, t};

    struct Fixture {
        engine: Arc<RelayEngine>,
        gpio: Arc<SimulatedGpio>,
        bus: EventBus<RelayEvent>,
    }

    fn id(id: u8) -> ChannelId {
        ChannelId::new(id).unwrap()
    }

    fn pin_map(pins: &[(u8, u32)]) -> BTreeMap<ChannelId, Pin> {
        pins.iter().map(|(channel, pin)| (id(*channel), Pin(*pin))).collect()
    }

    async fn engine_with(pins: &[(u8, u32)]) -> Fixture {
        let gpio = Arc::new(SimulatedGpio::default());
        let bus = EventBus::new(64);
        let engine = Arc::new(RelayEngine::new(
            gpio.clone(),
            true,
            t!(200 millis),
            t!(1 millis),
            bus.emitter(),
        ));
        engine.sync_channels(&pin_map(pins)).await.unwrap();

        Fixture { engine, gpio, bus }
    }

    #[tokio::test]
    async fn test_channels_start_disengaged_with_inactive_level() {
        let f = engine_with(&[(1, 14), (2, 15)]).await;

        assert_eq!(f.engine.get_state(id(1)).await.unwrap().state, RelayState::Disengaged);
        assert_eq!(f.gpio.level(Pin(14)), Some(Level::High));
        assert_eq!(f.gpio.level(Pin(15)), Some(Level::High));
    }

    #[tokio::test]
    async fn test_read_your_write() {
        let f = engine_with(&[(1, 14)]).await;

        let result = f.engine.set_state(id(1), RelayState::Engaged).await.unwrap();

        assert_eq!(result.previous_state, RelayState::Disengaged);
        assert_eq!(result.new_state, RelayState::Engaged);
        assert_eq!(f.engine.get_state(id(1)).await.unwrap().state, RelayState::Engaged);
        assert_eq!(f.gpio.level(Pin(14)), Some(Level::Low));
    }

    #[tokio::test]
    async fn test_toggle_is_confirmed_by_read_back() {
        let f = engine_with(&[(1, 14), (2, 15)]).await;

        let result = f.engine.toggle(id(1)).await.unwrap();

        assert_eq!(result.previous_state, RelayState::Disengaged);
        assert_eq!(result.new_state, RelayState::Engaged);
        assert_eq!(result.confirmed_state, Some(RelayState::Engaged));
        assert_eq!(result.status, SwitchStatus::Confirmed);
    }

    #[tokio::test]
    async fn test_toggle_twice_restores_state() {
        let f = engine_with(&[(1, 14)]).await;

        f.engine.toggle(id(1)).await.unwrap();
        let result = f.engine.toggle(id(1)).await.unwrap();

        assert_eq!(result.new_state, RelayState::Disengaged);
        assert_eq!(f.engine.get_state(id(1)).await.unwrap().state, RelayState::Disengaged);
    }

    #[tokio::test]
    async fn test_unknown_channel_is_rejected() {
        let f = engine_with(&[(1, 14)]).await;

        assert!(matches!(
            f.engine.get_state(id(9)).await,
            Err(RelayError::UnknownChannel { channel_id }) if channel_id == id(9)
        ));
        assert!(matches!(
            f.engine.set_state(id(9), RelayState::Engaged).await,
            Err(RelayError::UnknownChannel { .. })
        ));
        assert!(matches!(f.engine.toggle(id(9)).await, Err(RelayError::UnknownChannel { .. })));
    }

    #[tokio::test]
    async fn test_stuck_pin_is_reported_as_mismatch() {
        let f = engine_with(&[(1, 14)]).await;
        f.gpio.set_stuck(Pin(14), true);

        let result = f.engine.set_state(id(1), RelayState::Engaged).await.unwrap();

        assert_eq!(result.new_state, RelayState::Engaged);
        assert_eq!(result.confirmed_state, Some(RelayState::Disengaged));
        assert_eq!(result.status, SwitchStatus::HardwareMismatch);
        //not retried
        assert_eq!(f.gpio.write_count(), 2);
    }

    #[tokio::test]
    async fn test_failed_write_keeps_state() {
        let f = engine_with(&[(1, 14)]).await;
        f.gpio.set_broken(Pin(14), true);

        let result = f.engine.set_state(id(1), RelayState::Engaged).await;

        assert!(matches!(result, Err(RelayError::Hardware { .. })));
        f.gpio.set_broken(Pin(14), false);
        assert_eq!(f.engine.get_state(id(1)).await.unwrap().state, RelayState::Disengaged);
    }

    #[tokio::test]
    async fn test_all_states_contains_every_channel() {
        let f = engine_with(&[(1, 14), (2, 15), (3, 18), (4, 23), (5, 24), (6, 25), (7, 8), (8, 7)]).await;

        let all = f.engine.get_all_states().await.unwrap();

        assert_eq!(all.channels.len(), 8);
        assert_eq!(all.channels[6].physical_pin, Pin(8));
    }

    #[tokio::test]
    async fn test_sync_drops_removed_and_keeps_existing_channels() {
        let f = engine_with(&[(1, 14), (2, 15)]).await;
        f.engine.set_state(id(1), RelayState::Engaged).await.unwrap();

        f.engine.sync_channels(&pin_map(&[(1, 14), (3, 18)])).await.unwrap();

        let all = f.engine.get_all_states().await.unwrap();
        let ids: Vec<ChannelId> = all.channels.iter().map(|c| c.channel_id).collect();
        assert_eq!(ids, vec![id(1), id(3)]);
        assert_eq!(all.channels[0].state, RelayState::Engaged);
    }

    #[tokio::test]
    async fn test_change_event_only_on_actual_change() {
        let f = engine_with(&[(1, 14)]).await;
        let mut listener = f.bus.subscribe();

        f.engine.set_state(id(1), RelayState::Disengaged).await.unwrap();
        f.engine.set_state(id(1), RelayState::Engaged).await.unwrap();

        match listener.recv().await {
            Some(RelayEvent::StateChanged(result)) => assert_eq!(result.new_state, RelayState::Engaged),
            other => panic!("Unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_concurrent_writes_never_interleave() {
        let f = engine_with(&[(1, 14)]).await;

        let mut handles = vec![];
        for i in 0..20 {
            let engine = f.engine.clone();
            let desired = if i % 2 == 0 { RelayState::Engaged } else { RelayState::Disengaged };
            handles.push(tokio::spawn(async move { engine.set_state(id(1), desired).await }));
        }

        let mut results = vec![];
        for handle in handles {
            results.push(handle.await.unwrap().unwrap());
        }
        results.sort_by_key(|r| r.timestamp);

        //every write observes the outcome of the write before it
        let mut expected_previous = RelayState::Disengaged;
        for result in results {
            assert_eq!(result.previous_state, expected_previous);
            expected_previous = result.new_state;
        }
    }

    #[tokio::test]
    async fn test_playtime_ends_disengaged_and_queues_writers() {
        let f = engine_with(&[(1, 14), (2, 15)]).await;

        let engine = f.engine.clone();
        let playtime = tokio::spawn(async move { engine.run_playtime().await });
        tokio::task::yield_now().await;

        let engine = f.engine.clone();
        let writer = tokio::spawn(async move { engine.set_state(id(1), RelayState::Engaged).await });

        let message = playtime.await.unwrap().unwrap();
        let written = writer.await.unwrap().unwrap();

        assert_eq!(message, "Playtime done. Hope you enjoyed it.");
        //the writer ran after the disengage pass
        assert_eq!(written.previous_state, RelayState::Disengaged);
        assert_eq!(f.engine.get_state(id(1)).await.unwrap().state, RelayState::Engaged);
        assert_eq!(f.engine.get_state(id(2)).await.unwrap().state, RelayState::Disengaged);
        assert_eq!(f.gpio.write_count(), 2 + 4 + 1);
    }

    #[tokio::test]
    async fn test_playtime_disengages_everything_despite_broken_channel() {
        let f = engine_with(&[(1, 14), (2, 15), (3, 18)]).await;
        f.gpio.set_broken(Pin(15), true);

        let result = f.engine.run_playtime().await;

        match result {
            Err(RelayError::Hardware { channel_id, message }) => {
                assert_eq!(channel_id, id(2));
                assert!(message.starts_with("Playtime incomplete"), "{}", message);
            }
            other => panic!("Unexpected playtime result {:?}", other),
        }
        assert_eq!(f.engine.get_state(id(1)).await.unwrap().state, RelayState::Disengaged);
        assert_eq!(f.engine.get_state(id(3)).await.unwrap().state, RelayState::Disengaged);
        assert_eq!(f.gpio.level(Pin(14)), Some(Level::High));
        assert_eq!(f.gpio.level(Pin(18)), Some(Level::High));
    }

    #[tokio::test]
    async fn test_sync_releases_pin_of_moved_channel() {
        let f = engine_with(&[(1, 14), (2, 15)]).await;
        f.engine.set_state(id(1), RelayState::Engaged).await.unwrap();
        assert_eq!(f.gpio.level(Pin(14)), Some(Level::Low));

        f.engine.sync_channels(&pin_map(&[(1, 18), (2, 15)])).await.unwrap();

        assert_eq!(f.gpio.level(Pin(14)), Some(Level::High));
        assert_eq!(f.gpio.level(Pin(18)), Some(Level::High));
        let all = f.engine.get_all_states().await.unwrap();
        assert_eq!(all.channels[0].physical_pin, Pin(18));
        assert_eq!(all.channels[0].state, RelayState::Disengaged);
    }

    #[tokio::test]
    async fn test_busy_engine_times_out() {
        let gpio = Arc::new(SimulatedGpio::default());
        let bus = EventBus::new(8);
        let engine = Arc::new(RelayEngine::new(gpio, true, t!(20 millis), t!(100 millis), bus.emitter()));
        engine.sync_channels(&pin_map(&[(1, 14), (2, 15)])).await.unwrap();

        let playtime_engine = engine.clone();
        let playtime = tokio::spawn(async move { playtime_engine.run_playtime().await });
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;

        let result = engine.set_state(id(1), RelayState::Engaged).await;

        assert!(matches!(result, Err(RelayError::EngineBusy { .. })));
        playtime.await.unwrap().unwrap();
    }
}
