use std::sync::Arc;

use adapter::mqtt::{MqttCommandListener, NotificationForwarder};
use relay::RelayRunner;
use router::CommandRouter;
use schedule_store::ScheduleStoreModule;
use scheduler::SchedulerRunner;
use settings::Settings;

mod adapter;
mod core;
mod hardware;
mod relay;
mod router;
mod schedule_store;
mod scheduler;
mod settings;

#[tokio::main(flavor = "multi_thread")]
pub async fn main() {
    let settings = Settings::new().expect("Error reading configuration");

    settings.monitoring.init().expect("Error initializing monitoring");

    let store = ScheduleStoreModule::load(&settings.store)
        .await
        .expect("Error loading settings document");
    let document = store.client().load().await;

    let relay_runner = RelayRunner::new(
        &settings.engine,
        settings.hardware.new_output_driver(),
        settings.hardware.active_low,
        store.subscribe(),
    );

    tracing::info!("Initializing {} relay channels", document.pin_map.len());
    if let Err(e) = relay_runner.init(&document.pin_map).await {
        tracing::error!("Error initializing relay outputs: {}", e);
    }

    let sensor = Arc::new(settings.sensor.new_adapter());
    match sensor.read().await {
        Ok(reading) => tracing::info!(
            "Initial sensor reading: {}°C, {}% humidity",
            reading.temperature,
            reading.humidity
        ),
        Err(e) => tracing::warn!("Sensor not available at startup: {}", e),
    }

    let scheduler_runner = SchedulerRunner::new(
        &settings.scheduler,
        relay_runner.client(),
        sensor.clone(),
        store.subscribe(),
    );

    let router = CommandRouter::new(relay_runner.client(), store.client(), scheduler_runner.client(), sensor);

    let mut mqtt_client = settings.mqtt.new_client();

    //topic changes apply on next start
    let subscription = mqtt_client.subscribe_all(&document.subscribed_topics);

    let command_listener = MqttCommandListener::new(
        router.clone(),
        subscription,
        mqtt_client.sender(),
        &settings.notifications,
    );

    let notification_forwarder = NotificationForwarder::new(
        relay_runner.subscribe(),
        scheduler_runner.subscribe(),
        mqtt_client.sender(),
        settings.notifications.clone(),
    );

    let http_server_exec = {
        let router = router.clone();

        async move {
            settings
                .http_server
                .run_server(move || vec![adapter::http::new_routes(router.clone())])
                .await
                .expect("HTTP server execution failed");
        }
    };

    tracing::info!("Starting main loop");

    tokio::select!(
        _ = mqtt_client.run() => {},
        _ = relay_runner.run() => {},
        _ = scheduler_runner.run(document) => {},
        _ = command_listener.run() => {},
        _ = notification_forwarder.run() => {},
        _ = http_server_exec => {},
    );

    tracing::error!("A service stopped unexpectedly, shutting down");
}
