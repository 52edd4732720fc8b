//! Subscribe to a topic, publish to it and print what comes back.
//!
//! Run with: cargo run -p giztoy-mqttc --example simple_client -- mqtt://localhost:1883
//! Set RUST_LOG=giztoy_mqttc=debug to see protocol logs.

use std::time::Duration;

use giztoy_mqttc::{Client, ClientConfig, PublishOptions, QoS, Will};
use tracing_subscriber::EnvFilter;

fn main() -> giztoy_mqttc::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .init();

    let url = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "mqtt://localhost:1883".to_string());
    let config = ClientConfig::from_url(&url)?.with_keep_alive(5);

    let client = Client::new(config);
    let will = Will::new(format!("status/{}", client.client_id()), "offline").with_retain(true);
    client.connect(Some(will))?;
    println!("Connected to {} as {}", url, client.client_id());

    client.subscribe([("/test1", QoS::AtMostOnce), ("/test2", QoS::AtLeastOnce)])?;
    std::thread::sleep(Duration::from_millis(200));

    client.publish("/test1", "message_1", PublishOptions::default())?;
    client.publish(
        "/test2",
        "message_2",
        PublishOptions::default().with_qos(QoS::AtLeastOnce),
    )?;

    for _ in 0..2 {
        match client.get_message_timeout(Duration::from_secs(5))? {
            Some(msg) => println!("{} <- {} (qos={:?})", msg.topic, msg.payload_str(), msg.qos),
            None => {
                println!("No message within 5s");
                break;
            }
        }
    }

    client.disconnect()
}
