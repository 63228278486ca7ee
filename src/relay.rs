//! Routing of action-tagged queue messages into the ingestion pipelines.
//!
//! Message transports (a JSON-lines file, a broker subscription) only need to
//! hand decoded records to a [`RecordSink`].

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::io::BufRead;
use tracing::{debug, info, warn};

use crate::error::IngestError;
use crate::ingest::{IngestReport, StationIngest, StatusIngest};
use crate::model::RawRecord;
use crate::normalize::split_full_refresh;

/// Delivers normalized record batches to whatever persists them.
#[async_trait]
pub trait RecordSink: Send + Sync {
    async fn deliver_stations(&self, records: Vec<RawRecord>) -> Result<IngestReport, IngestError>;

    async fn deliver_status(
        &self,
        feed_id: &str,
        records: Vec<RawRecord>,
    ) -> Result<IngestReport, IngestError>;
}

/// Sink backed by the two ingestion pipelines.
pub struct PipelineSink {
    stations: StationIngest,
    status: StatusIngest,
}

impl PipelineSink {
    pub fn new(stations: StationIngest, status: StatusIngest) -> Self {
        Self { stations, status }
    }
}

#[async_trait]
impl RecordSink for PipelineSink {
    async fn deliver_stations(&self, records: Vec<RawRecord>) -> Result<IngestReport, IngestError> {
        self.stations.ingest_raw(records).await
    }

    async fn deliver_status(
        &self,
        feed_id: &str,
        records: Vec<RawRecord>,
    ) -> Result<IngestReport, IngestError> {
        self.status.ingest(feed_id, records).await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageAction {
    RefreshStation,
    RefreshStatus,
    /// Station information with its status nested under `status`.
    FullRefresh,
}

impl MessageAction {
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "refreshStation" => Some(MessageAction::RefreshStation),
            "refreshStatus" => Some(MessageAction::RefreshStatus),
            "fullRefresh" => Some(MessageAction::FullRefresh),
            _ => None,
        }
    }
}

/// Messages sorted by destination pipeline.
#[derive(Debug, Default, PartialEq)]
pub struct GroupedMessages {
    pub stations: Vec<RawRecord>,
    pub status: Vec<RawRecord>,
    /// Messages without a known action, or full refreshes that could not be split.
    pub skipped: usize,
}

/// Sorts messages by their `action` tag, which is removed from each record.
/// Full refreshes contribute one record to each group.
pub fn group_messages(messages: Vec<RawRecord>) -> GroupedMessages {
    let mut grouped = GroupedMessages::default();

    for mut message in messages {
        let action = match message.remove("action") {
            Some(Value::String(tag)) => MessageAction::from_tag(&tag),
            _ => None,
        };
        match action {
            Some(MessageAction::RefreshStation) => grouped.stations.push(message),
            Some(MessageAction::RefreshStatus) => grouped.status.push(message),
            Some(MessageAction::FullRefresh) => match split_full_refresh(message) {
                Ok((station, status)) => {
                    grouped.stations.push(station);
                    grouped.status.push(status);
                }
                Err(e) => {
                    warn!(error = %e, "Skipping full refresh that could not be split");
                    grouped.skipped += 1;
                }
            },
            None => {
                debug!("Skipping message without a known action");
                grouped.skipped += 1;
            }
        }
    }

    grouped
}

/// Decodes one transport payload: a JSON object, or an array of objects
/// when the transport batches messages.
pub fn decode_message(payload: &str) -> Result<Vec<RawRecord>, IngestError> {
    let value: Value =
        serde_json::from_str(payload).map_err(|e| IngestError::Feed(e.to_string()))?;
    match value {
        Value::Object(record) => Ok(vec![record]),
        Value::Array(items) => items
            .into_iter()
            .map(|item| match item {
                Value::Object(record) => Ok(record),
                other => Err(IngestError::Feed(format!(
                    "message is not an object: {other}"
                ))),
            })
            .collect(),
        other => Err(IngestError::Feed(format!("message is not an object: {other}"))),
    }
}

/// Reads JSON-lines payloads, skipping blank lines. Undecodable lines are
/// logged and counted rather than aborting the read.
pub fn read_messages<R: BufRead>(reader: R) -> Result<(Vec<RawRecord>, usize), std::io::Error> {
    let mut messages = Vec::new();
    let mut rejected = 0;

    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match decode_message(&line) {
            Ok(mut decoded) => messages.append(&mut decoded),
            Err(e) => {
                warn!(line = index + 1, error = %e, "Skipping undecodable message");
                rejected += 1;
            }
        }
    }

    Ok((messages, rejected))
}

/// Outcome of relaying one group of messages.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RelayReport {
    pub stations: IngestReport,
    pub status: IngestReport,
    pub skipped: usize,
}

/// Groups `messages` and delivers stations first, then status readings
/// under `feed_id`.
#[tracing::instrument(skip(sink, messages), fields(messages = messages.len()))]
pub async fn relay_messages(
    sink: &dyn RecordSink,
    feed_id: &str,
    messages: Vec<RawRecord>,
) -> Result<RelayReport, IngestError> {
    let grouped = group_messages(messages);
    info!(
        stations = grouped.stations.len(),
        status = grouped.status.len(),
        skipped = grouped.skipped,
        "Grouped messages"
    );

    let stations = if grouped.stations.is_empty() {
        IngestReport::empty()
    } else {
        sink.deliver_stations(grouped.stations).await?
    };
    let status = if grouped.status.is_empty() {
        IngestReport::empty()
    } else {
        sink.deliver_status(feed_id, grouped.status).await?
    };

    Ok(RelayReport {
        stations,
        status,
        skipped: grouped.skipped,
    })
}
