use std::{sync::Arc, time::Duration};

use anyhow::Context as _;
use rumqttc::v5::{
    AsyncClient, Event, EventLoop, MqttOptions,
    mqttbytes::{
        QoS,
        v5::{ConnectProperties, Packet, Publish, SubscribeProperties},
    },
};
use tokio::sync::mpsc;

use super::*;

const SUBSCRIBER_BUFFER: usize = 32;
const FORWARD_TIMEOUT: Duration = Duration::from_secs(5);

/// MQTT v5 connection. Incoming messages are routed to subscribers by the subscription
/// identifier the broker attaches to every publish.
pub struct Mqtt {
    client: Arc<AsyncClient>,
    event_loop: EventLoop,
    routes: Vec<TopicRoute>,
}

struct TopicRoute {
    filter: String,
    subscribers: Vec<mpsc::Sender<MqttInMessage>>,
}

impl Mqtt {
    pub(super) fn connect(config: &MqttConfig) -> Self {
        let mut options = MqttOptions::new(&config.client_id, &config.host, config.port);
        options.set_keep_alive(Duration::from_secs(config.keep_alive_secs));
        options.set_clean_start(false);

        if let Some((username, password)) = config.credentials() {
            options.set_credentials(username, password);
        }

        let mut connect_props = ConnectProperties::new();
        connect_props.session_expiry_interval = 60.into();
        connect_props.max_packet_size = Some(1024 * 1024);
        options.set_connect_properties(connect_props);

        tracing::info!("Connecting to MQTT broker {}:{} as {}", config.host, config.port, config.client_id);
        let (client, event_loop) = AsyncClient::new(options, 10);

        Mqtt {
            client: Arc::new(client),
            event_loop,
            routes: vec![],
        }
    }

    /// One subscription receiving the messages of all given topic filters. Filters are sent to the
    /// broker on every connect, so registering never waits for the connection.
    pub fn subscribe_all(&mut self, topics: &[String]) -> MqttSubscription {
        let (tx, rx) = mpsc::channel::<MqttInMessage>(SUBSCRIBER_BUFFER);

        let mut filters = topics.to_vec();
        filters.sort();
        filters.dedup();

        if filters.is_empty() {
            tracing::warn!("Subscription without topics will never receive a message");
        }

        for filter in filters {
            if let Some(route) = self.routes.iter_mut().find(|r| r.filter == filter) {
                tracing::info!("Sharing existing MQTT subscription for {}", filter);
                route.subscribers.push(tx.clone());
                continue;
            }

            tracing::info!("Registering MQTT topic {}", filter);
            self.routes.push(TopicRoute {
                filter,
                subscribers: vec![tx.clone()],
            });
        }

        MqttSubscription::new(rx)
    }

    pub fn sender(&self) -> MqttSender {
        MqttSender::new(self.client.clone())
    }

    pub async fn run(mut self) {
        loop {
            match self.event_loop.poll().await {
                Ok(Event::Incoming(Packet::Publish(publish))) => self.route(publish).await,
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    tracing::info!("Connected to MQTT broker");
                    self.subscribe_routes();
                }
                Ok(Event::Incoming(Packet::Disconnect(_))) => tracing::warn!("MQTT broker closed the connection"),
                Ok(_) => {}
                Err(e) => {
                    tracing::error!("MQTT connection error: {}", e);
                    //next poll reconnects
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }
    }

    //runs detached, the event loop has to keep polling while the requests are queued
    fn subscribe_routes(&self) {
        let client = self.client.clone();
        let filters: Vec<String> = self.routes.iter().map(|r| r.filter.clone()).collect();

        tokio::spawn(async move {
            for (index, filter) in filters.into_iter().enumerate() {
                //identifiers are 1-based, index + 1 of the route
                let properties = SubscribeProperties {
                    id: Some(index + 1),
                    user_properties: vec![],
                };

                let subscribed = client
                    .subscribe_with_properties(filter.as_str(), QoS::AtLeastOnce, properties)
                    .await
                    .with_context(|| format!("Error subscribing to MQTT topic {}", filter));

                match subscribed {
                    Ok(()) => tracing::info!("Subscribed to MQTT topic {}", filter),
                    Err(e) => tracing::error!("{:?}", e),
                }
            }
        });
    }

    async fn route(&self, publish: Publish) {
        let message: MqttInMessage = match (&publish).try_into() {
            Ok(m) => m,
            Err(e) => {
                tracing::error!("Dropping MQTT message with invalid UTF-8: {}", e);
                return;
            }
        };

        let Some(properties) = publish.properties else {
            tracing::error!("MQTT message on {} without subscription identifiers", message.topic);
            return;
        };

        for id in properties.subscription_identifiers {
            let Some(route) = id.checked_sub(1).and_then(|index| self.routes.get(index)) else {
                tracing::error!("MQTT message on {} for unknown subscription {}", message.topic, id);
                continue;
            };

            tracing::trace!("Routing MQTT message on {} via {}", message.topic, route.filter);

            for subscriber in route.subscribers.iter() {
                if let Err(e) = subscriber.send_timeout(message.clone(), FORWARD_TIMEOUT).await {
                    tracing::error!("Error forwarding MQTT message on {} to subscriber: {}", message.topic, e);
                }
            }
        }
    }
}
