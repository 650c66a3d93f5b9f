use rand::Rng;
use rumqttc::{AsyncClient, MqttOptions, QoS};
use serde::Serialize;
use std::time::{Duration, Instant};
use tokio::time::sleep;

#[derive(Debug, Clone, Serialize)]
struct Payload {
    device_id: String,
    temperature: Option<f64>,
    humidity: Option<f64>,
    gas_adc: i64,
    gas_ppm: i64,
    voltage: f64,
    alarm: bool,
}

impl Payload {
    fn random(device_id: String) -> Self {
        let mut rng = rand::thread_rng();
        let gas_ppm = if rng.gen_bool(0.05) {
            rng.gen_range(1000..2500)
        } else {
            rng.gen_range(100..900)
        };
        Self {
            device_id,
            temperature: Some(rng.gen_range(20.0..42.0)),
            humidity: Some(rng.gen_range(30.0..80.0)),
            gas_adc: gas_ppm / 2,
            gas_ppm,
            voltage: rng.gen_range(3.0..3.4),
            alarm: gas_ppm >= 1000,
        }
    }
}

async fn publish_at_rate(
    client_id: &str,
    devices: usize,
    target_rate: u64,
    duration_secs: u64,
) -> (u64, u64, Duration) {
    let mut mqtt_options = MqttOptions::new(client_id, "localhost", 1883);
    mqtt_options.set_keep_alive(Duration::from_secs(30));

    let (client, mut eventloop) = AsyncClient::new(mqtt_options, 20000);

    tokio::spawn(async move {
        loop {
            if let Err(e) = eventloop.poll().await {
                eprintln!("MQTT error: {}", e);
                break;
            }
        }
    });

    sleep(Duration::from_millis(500)).await;

    let total_messages = duration_secs * target_rate;
    let burst_size = 100;
    let delay_per_burst = Duration::from_micros((burst_size * 1_000_000) / target_rate);

    let start = Instant::now();
    let mut sent_count = 0;
    let mut error_count = 0;

    for batch_start in (0..total_messages).step_by(burst_size as usize) {
        for i in batch_start..std::cmp::min(batch_start + burst_size, total_messages) {
            let device_id = format!("LOAD-{:03}", i % devices as u64);
            let payload = serde_json::to_vec(&Payload::random(device_id)).unwrap();

            match client
                .publish("Relawand", QoS::AtLeastOnce, false, payload)
                .await
            {
                Ok(_) => sent_count += 1,
                Err(e) => {
                    error_count += 1;
                    if error_count < 10 {
                        eprintln!("Send error: {}", e);
                    }
                }
            }
        }

        sleep(delay_per_burst).await;

        if (batch_start + burst_size) % 5000 == 0 {
            let elapsed = start.elapsed().as_secs_f64();
            println!(
                "{} msgs ({:.0} msg/s)",
                batch_start + burst_size,
                (batch_start + burst_size) as f64 / elapsed
            );
        }
    }

    (sent_count, error_count, start.elapsed())
}

#[tokio::test]
#[ignore]
async fn test_500_readings_per_second() {
    let (sent, errors, duration) = publish_at_rate("relawand-load", 10, 500, 10).await;

    let rate = sent as f64 / duration.as_secs_f64();
    println!("Sent {} readings in {:.2}s ({:.0} msg/s), {} errors", sent, duration.as_secs_f64(), rate, errors);

    assert!(rate >= 450.0, "Throughput too low: {:.2} msg/s", rate);
    assert_eq!(errors, 0, "Publish errors: {}", errors);
}

#[tokio::test]
#[ignore]
async fn test_sustained_load_60_seconds() {
    let (sent, errors, duration) = publish_at_rate("relawand-load-sustained", 50, 500, 60).await;

    let rate = sent as f64 / duration.as_secs_f64();
    println!("Sustained {:.0} msg/s over {:.2}s, {} errors", rate, duration.as_secs_f64(), errors);

    assert!(rate >= 450.0);
}
