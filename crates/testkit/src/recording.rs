//! Event sink that records everything it is given.

use anyhow::Result;
use deepmine_net::{EventSink, GameEvent};
use serde::Serialize;
use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

/// One recorded event in serializable form.
#[derive(Debug, Serialize)]
pub struct EventRecord<'a> {
    /// Position in the recording.
    pub index: usize,
    /// Variant name.
    pub kind: &'a str,
    /// Debug rendering of the whole event.
    pub payload: String,
}

/// Variant name of an event, e.g. `"WorldReady"`.
pub fn event_kind(event: &GameEvent) -> String {
    let debug = format!("{event:?}");
    debug
        .split(|c: char| !c.is_alphanumeric() && c != '_')
        .next()
        .unwrap_or_default()
        .to_string()
}

/// [`EventSink`] that keeps every event in order.
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Vec<GameEvent>,
}

impl RecordingSink {
    /// Empty recording.
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything recorded so far.
    pub fn events(&self) -> &[GameEvent] {
        &self.events
    }

    /// Drain the recording.
    pub fn take(&mut self) -> Vec<GameEvent> {
        std::mem::take(&mut self.events)
    }

    /// Number of events matching `pred`.
    pub fn count(&self, pred: impl Fn(&GameEvent) -> bool) -> usize {
        self.events.iter().filter(|e| pred(e)).count()
    }

    /// Whether any event matches `pred`.
    pub fn any(&self, pred: impl Fn(&GameEvent) -> bool) -> bool {
        self.events.iter().any(pred)
    }

    /// Write the recording as newline-delimited JSON, creating parent dirs.
    pub fn write_jsonl<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = File::create(path)?;
        for (index, event) in self.events.iter().enumerate() {
            let kind = event_kind(event);
            let record = EventRecord {
                index,
                kind: &kind,
                payload: format!("{event:?}"),
            };
            let line = serde_json::to_string(&record)?;
            file.write_all(line.as_bytes())?;
            file.write_all(b"\n")?;
        }
        Ok(())
    }
}

impl EventSink for RecordingSink {
    fn emit(&mut self, event: GameEvent) {
        self.events.push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use deepmine_core::PlayerTeam;

    #[test]
    fn records_in_order() {
        let mut sink = RecordingSink::new();
        sink.emit(GameEvent::WorldReady);
        sink.emit(GameEvent::GameOver {
            winner: PlayerTeam::Red,
        });
        assert_eq!(sink.events().len(), 2);
        assert_eq!(sink.count(|e| matches!(e, GameEvent::WorldReady)), 1);
        assert_eq!(event_kind(&sink.events()[1]), "GameOver");
        assert_eq!(sink.take().len(), 2);
        assert!(sink.events().is_empty());
    }

    #[test]
    fn writes_jsonl() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested/events.jsonl");
        let mut sink = RecordingSink::new();
        sink.emit(GameEvent::WorldReady);
        sink.emit(GameEvent::Ping { player_id: 4 });
        sink.write_jsonl(&path).expect("write succeeds");

        let contents = fs::read_to_string(&path).expect("file readable");
        let lines: Vec<_> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("\"kind\":\"WorldReady\""));
        assert!(lines[1].contains("player_id: 4"));
    }
}
