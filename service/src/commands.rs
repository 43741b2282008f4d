//! Newline-delimited JSON commands for the producer process.
//!
//! Each input line is one command object, tagged by `command`:
//!
//! ```text
//! {"command":"create","appointment":{"patientName":"Ada","doctorName":"Dr. Grey","appointmentDate":"2025-03-01","appointmentTime":"09:30"}}
//! {"command":"update","id":"…","changes":{"appointmentTime":"11:00"}}
//! {"command":"cancel","id":"…","reason":"Patient request"}
//! {"command":"batch","appointments":[{…},{…}]}
//! ```
//!
//! Blank lines and lines starting with `#` are skipped. Every command writes
//! one JSON result line to the output. A malformed line or a rejected command
//! is reported and the next line is processed.

use appointment_events_core::NewAppointment;
use appointment_events_core::envelope::Placement;
use appointment_events_runtime::{AppointmentProducer, PipelineError, Shutdown};
use serde::Deserialize;
use serde_json::{Map, Value, json};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

/// A producer command.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(tag = "command", rename_all = "lowercase")]
pub enum Command {
    /// Publish a created event
    Create {
        /// Appointment fields
        appointment: NewAppointment,
    },
    /// Publish an updated event
    Update {
        /// Appointment id
        id: String,
        /// Changed fields
        #[serde(default)]
        changes: Map<String, Value>,
    },
    /// Publish a cancelled event
    Cancel {
        /// Appointment id
        id: String,
        /// Optional cancellation reason
        #[serde(default)]
        reason: Option<String>,
    },
    /// Publish several created events as one request
    Batch {
        /// Appointments, in publish order
        appointments: Vec<NewAppointment>,
    },
}

impl Command {
    /// Parse one input line. Returns `Ok(None)` for blank and comment lines.
    ///
    /// # Errors
    ///
    /// Returns the JSON error if the line is not a valid command.
    pub fn parse(line: &str) -> Result<Option<Self>, serde_json::Error> {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            return Ok(None);
        }
        serde_json::from_str(line).map(Some)
    }

    /// Command name as written on input.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Create { .. } => "create",
            Self::Update { .. } => "update",
            Self::Cancel { .. } => "cancel",
            Self::Batch { .. } => "batch",
        }
    }

    /// Run the command against `producer`, returning the result line.
    ///
    /// # Errors
    ///
    /// Propagates the producer's error unchanged.
    pub async fn execute(self, producer: &AppointmentProducer) -> Result<Value, PipelineError> {
        let name = self.name();
        let result = match self {
            Self::Create { appointment } => {
                let published = producer.create_appointment(appointment).await?;
                placed(name, published.appointment.id(), published.placement)
            }
            Self::Update { id, changes } => {
                let published = producer.update_appointment(&id, changes).await?;
                placed(name, &published.update.id, published.placement)
            }
            Self::Cancel { id, reason } => {
                let published = producer.cancel_appointment(&id, reason.as_deref()).await?;
                placed(name, &published.cancellation.id, published.placement)
            }
            Self::Batch { appointments } => {
                let published = producer.send_batch(appointments).await?;
                let items: Vec<Value> = published
                    .iter()
                    .map(|item| placed("create", item.appointment.id(), item.placement))
                    .collect();
                json!({ "command": name, "published": items })
            }
        };
        Ok(result)
    }
}

fn placed(command: &str, id: &str, placement: Placement) -> Value {
    json!({
        "command": command,
        "id": id,
        "partition": placement.partition,
        "offset": placement.offset,
    })
}

/// Counts from one [`pump`] run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PumpSummary {
    /// Commands published
    pub published: u64,
    /// Commands the producer rejected
    pub rejected: u64,
    /// Lines that were not valid commands
    pub malformed: u64,
}

/// Read commands from `input` until end of input or `shutdown`, executing
/// each against `producer` and writing one result line per command.
///
/// A shutdown lets the command in flight finish first.
///
/// # Errors
///
/// Returns an error only if reading input or writing output fails.
pub async fn pump<R, W>(
    producer: &AppointmentProducer,
    input: R,
    output: &mut W,
    shutdown: &Shutdown,
) -> std::io::Result<PumpSummary>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = input.lines();
    let mut summary = PumpSummary::default();
    let stopped = shutdown.listener();
    tokio::pin!(stopped);

    loop {
        let line = tokio::select! {
            biased;
            () = &mut stopped => {
                tracing::info!("Shutdown requested, no further commands read");
                break;
            }
            line = lines.next_line() => line?,
        };
        let Some(line) = line else {
            break;
        };

        let command = match Command::parse(&line) {
            Ok(Some(command)) => command,
            Ok(None) => continue,
            Err(e) => {
                tracing::warn!(error = %e, "Skipping malformed command");
                summary.malformed += 1;
                write_line(output, &json!({ "error": format!("malformed command: {e}") })).await?;
                continue;
            }
        };

        let name = command.name();
        match command.execute(producer).await {
            Ok(result) => {
                summary.published += 1;
                write_line(output, &result).await?;
            }
            Err(e) => {
                tracing::error!(command = name, error = %e, "Command rejected");
                summary.rejected += 1;
                write_line(output, &json!({ "command": name, "error": e.to_string() })).await?;
            }
        }
    }

    output.flush().await?;
    Ok(summary)
}

async fn write_line<W: AsyncWrite + Unpin>(output: &mut W, value: &Value) -> std::io::Result<()> {
    let mut line = value.to_string();
    line.push('\n');
    output.write_all(line.as_bytes()).await
}
