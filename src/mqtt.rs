//! MQTT transport: inbound subscription loop and outbound node commands.

use crate::config::Config;
use crate::ingest::TelemetryRouter;
use anyhow::Result;
use rumqttc::{AsyncClient, Event, Incoming, MqttOptions, QoS};
use tokio::sync::mpsc;
use tokio::time::{sleep, Duration};

#[derive(Debug)]
pub struct OutboundCommand {
    pub node_id: String,
    pub payload: serde_json::Value,
}

/// Clonable handle used by control surfaces to push commands down to a
/// node on `{root}/{node_id}/command` at QoS 1.
#[derive(Clone)]
pub struct CommandSender {
    tx: mpsc::UnboundedSender<OutboundCommand>,
}

impl CommandSender {
    pub fn publish_command(&self, node_id: impl Into<String>, payload: serde_json::Value) -> Result<()> {
        self.tx
            .send(OutboundCommand {
                node_id: node_id.into(),
                payload,
            })
            .map_err(|_| anyhow::anyhow!("mqtt listener is not running"))
    }
}

pub fn command_channel() -> (CommandSender, mpsc::UnboundedReceiver<OutboundCommand>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (CommandSender { tx }, rx)
}

pub async fn run_listener(
    config: Config,
    router: TelemetryRouter,
    mut commands: mpsc::UnboundedReceiver<OutboundCommand>,
) -> Result<()> {
    let status_filter = format!("{}/+/status", config.mqtt_topic_root);
    let sensors_filter = format!("{}/+/sensors", config.mqtt_topic_root);
    let mut commands_open = true;

    loop {
        let mut mqttoptions = MqttOptions::new(
            config.mqtt_client_id.clone(),
            config.mqtt_host.clone(),
            config.mqtt_port,
        );
        mqttoptions.set_keep_alive(config.mqtt_keepalive());
        if let Some(username) = &config.mqtt_username {
            mqttoptions.set_credentials(
                username.clone(),
                config.mqtt_password.clone().unwrap_or_default(),
            );
        }

        let (client, mut eventloop) = AsyncClient::new(mqttoptions, 32);
        let stats = router.stats();

        match client.subscribe(status_filter.clone(), QoS::AtLeastOnce).await {
            Ok(_) => {
                tracing::info!(topic = %status_filter, "subscribed to status feed");
                stats.set_mqtt_connected(true);
            }
            Err(err) => {
                tracing::warn!(error = %err, "failed to subscribe to MQTT; retrying");
                sleep(Duration::from_secs(2)).await;
                continue;
            }
        }
        if let Err(err) = client
            .subscribe(sensors_filter.clone(), QoS::AtLeastOnce)
            .await
        {
            tracing::warn!(error = %err, "failed to subscribe to sensors feed; retrying");
            stats.set_mqtt_connected(false);
            sleep(Duration::from_secs(2)).await;
            continue;
        }
        tracing::info!(topic = %sensors_filter, "subscribed to sensors feed");

        loop {
            tokio::select! {
                event = eventloop.poll() => match event {
                    Ok(Event::Incoming(Incoming::Publish(publish))) => {
                        let mut payload = publish.payload.to_vec();
                        router.route(&publish.topic, &mut payload).await;
                    }
                    Ok(_) => {}
                    Err(err) => {
                        stats.set_mqtt_connected(false);
                        tracing::warn!(error = %err, "MQTT connection dropped; reconnecting");
                        break;
                    }
                },
                cmd = commands.recv(), if commands_open => match cmd {
                    Some(cmd) => {
                        let topic = format!("{}/{}/command", config.mqtt_topic_root, cmd.node_id);
                        match serde_json::to_vec(&cmd.payload) {
                            Ok(bytes) => {
                                if let Err(err) =
                                    client.publish(&topic, QoS::AtLeastOnce, false, bytes).await
                                {
                                    tracing::warn!(error = %err, topic = %topic, "failed to publish command");
                                } else {
                                    tracing::info!(node = %cmd.node_id, "published command");
                                }
                            }
                            Err(err) => {
                                tracing::warn!(error = %err, node = %cmd.node_id, "failed to encode command")
                            }
                        }
                    }
                    None => commands_open = false,
                },
            }
        }

        sleep(Duration::from_secs(1)).await;
    }
}
