//! The producer command pump against the in-memory broker.

#![allow(clippy::unwrap_used)]

use appointment_events_core::TopicRegistry;
use appointment_events_runtime::{AppointmentProducer, Shutdown};
use appointment_events_testing::{InMemoryBroker, test_clock};
use appointment_service::{PumpSummary, detached_reader, pump};
use serde_json::Value;
use std::io::Read;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::BufReader;

async fn connected_producer(broker: &InMemoryBroker) -> AppointmentProducer {
    let producer = AppointmentProducer::new(
        Arc::new(broker.producer()),
        Arc::new(TopicRegistry::default()),
        Arc::new(test_clock()),
    );
    producer.connect().await.unwrap();
    producer
}

fn result_lines(output: &[u8]) -> Vec<Value> {
    String::from_utf8(output.to_vec())
        .unwrap()
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect()
}

#[tokio::test]
async fn commands_are_published_in_order() {
    let broker = InMemoryBroker::new();
    let producer = connected_producer(&broker).await;
    let input = concat!(
        "# morning clinic\n",
        r#"{"command":"create","appointment":{"id":"appt-1","patientName":"Ada","doctorName":"Dr. Grey","appointmentDate":"2025-03-01","appointmentTime":"09:30"}}"#,
        "\n\n",
        r#"{"command":"update","id":"appt-1","changes":{"appointmentTime":"11:00"}}"#,
        "\n",
        r#"{"command":"cancel","id":"appt-1"}"#,
        "\n",
    );
    let mut output = Vec::new();

    let summary = pump(&producer, input.as_bytes(), &mut output, &Shutdown::new())
        .await
        .unwrap();

    assert_eq!(
        summary,
        PumpSummary {
            published: 3,
            rejected: 0,
            malformed: 0,
        }
    );
    let topics: Vec<String> = broker
        .publish_calls()
        .into_iter()
        .map(|call| call.topic)
        .collect();
    assert_eq!(
        topics,
        vec![
            "appointments-created",
            "appointments-updated",
            "appointments-cancelled"
        ]
    );

    let results = result_lines(&output);
    assert_eq!(results.len(), 3);
    assert_eq!(results[0]["id"], "appt-1");
    assert_eq!(results[2]["command"], "cancel");
}

#[tokio::test]
async fn bad_lines_are_reported_and_skipped() {
    let broker = InMemoryBroker::new();
    let producer = connected_producer(&broker).await;
    let input = concat!(
        "{not json\n",
        r#"{"command":"create","appointment":{"patientName":"Ada"}}"#,
        "\n",
        r#"{"command":"cancel","id":"appt-9","reason":"Moved away"}"#,
        "\n",
    );
    let mut output = Vec::new();

    let summary = pump(&producer, input.as_bytes(), &mut output, &Shutdown::new())
        .await
        .unwrap();

    assert_eq!(
        summary,
        PumpSummary {
            published: 1,
            rejected: 1,
            malformed: 1,
        }
    );
    assert_eq!(broker.publish_calls().len(), 1);

    let results = result_lines(&output);
    assert!(results[0]["error"].as_str().unwrap().starts_with("malformed command"));
    assert!(
        results[1]["error"]
            .as_str()
            .unwrap()
            .starts_with("Validation failed")
    );
    assert_eq!(results[2]["id"], "appt-9");
}

#[tokio::test]
async fn batch_reports_every_placement() {
    let broker = InMemoryBroker::new();
    let producer = connected_producer(&broker).await;
    let input = concat!(
        r#"{"command":"batch","appointments":["#,
        r#"{"patientName":"A","doctorName":"D","appointmentDate":"2025-01-01","appointmentTime":"09:00"},"#,
        r#"{"patientName":"B","doctorName":"D","appointmentDate":"2025-01-01","appointmentTime":"09:30"}"#,
        "]}\n",
    );
    let mut output = Vec::new();

    pump(&producer, input.as_bytes(), &mut output, &Shutdown::new())
        .await
        .unwrap();

    let results = result_lines(&output);
    let published = results[0]["published"].as_array().unwrap();
    assert_eq!(published.len(), 2);
    assert_eq!(published[0]["offset"], 0);
    assert_eq!(published[1]["offset"], 1);
    assert_eq!(broker.publish_calls()[0].envelopes.len(), 2);
}

#[tokio::test]
async fn shutdown_stops_reading() {
    let broker = InMemoryBroker::new();
    let producer = connected_producer(&broker).await;
    let shutdown = Shutdown::new();
    shutdown.trigger();
    let mut output = Vec::new();

    let summary = pump(
        &producer,
        r#"{"command":"cancel","id":"appt-1"}"#.as_bytes(),
        &mut output,
        &shutdown,
    )
    .await
    .unwrap();

    assert_eq!(summary, PumpSummary::default());
    assert!(broker.publish_calls().is_empty());
}

/// Input that never produces data until released, like an idle terminal.
struct IdleTerminal(std::sync::mpsc::Receiver<()>);

impl Read for IdleTerminal {
    fn read(&mut self, _buf: &mut [u8]) -> std::io::Result<usize> {
        let _ = self.0.recv();
        Ok(0)
    }
}

#[tokio::test]
async fn shutdown_interrupts_a_pending_read() {
    let broker = InMemoryBroker::new();
    let producer = connected_producer(&broker).await;
    let shutdown = Shutdown::new();
    let (release, idle) = std::sync::mpsc::channel();
    let mut output = Vec::new();

    let trigger = {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            shutdown.trigger();
        })
    };

    let summary = tokio::time::timeout(
        Duration::from_secs(5),
        pump(
            &producer,
            BufReader::new(detached_reader(IdleTerminal(idle))),
            &mut output,
            &shutdown,
        ),
    )
    .await
    .unwrap()
    .unwrap();

    trigger.await.unwrap();
    drop(release);
    assert_eq!(summary, PumpSummary::default());
    assert!(output.is_empty());
}
