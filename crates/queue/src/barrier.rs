//! Chord barriers: collect header results, release the body exactly once.

use std::collections::HashMap;

use serde_json::Value;

use crate::task::{Signature, TaskId};

struct Chord {
    body: Signature,
    header_ids: Vec<TaskId>,
    results: Vec<Option<Value>>,
    remaining: usize,
    revoked: bool,
}

/// A chord whose header has fully resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct ReadyBody {
    pub body: Signature,
    /// Header results in header order.
    pub results: Vec<Value>,
    /// The chord was revoked; the body must not run.
    pub revoked: bool,
}

/// Outstanding chords, keyed by body id, plus the header membership index.
#[derive(Default)]
pub struct ChordTable {
    chords: HashMap<TaskId, Chord>,
    members: HashMap<TaskId, (TaskId, usize)>,
}

impl ChordTable {
    /// Track a new chord. An empty header is ready immediately.
    pub fn register(&mut self, header_ids: Vec<TaskId>, body: Signature) -> Option<ReadyBody> {
        if header_ids.is_empty() {
            return Some(ReadyBody {
                body,
                results: Vec::new(),
                revoked: false,
            });
        }

        let body_id = body.id;
        for (slot, id) in header_ids.iter().enumerate() {
            self.members.insert(*id, (body_id, slot));
        }
        self.chords.insert(
            body_id,
            Chord {
                body,
                remaining: header_ids.len(),
                results: vec![None; header_ids.len()],
                header_ids,
                revoked: false,
            },
        );
        None
    }

    /// Fill the header slot held by `header_id`. Each slot is filled once;
    /// later reports for the same task are ignored.
    pub fn record(&mut self, header_id: TaskId, value: Value) -> Option<ReadyBody> {
        let (body_id, slot) = self.members.remove(&header_id)?;
        let chord = self.chords.get_mut(&body_id)?;

        if chord.results[slot].is_some() {
            return None;
        }
        chord.results[slot] = Some(value);
        chord.remaining -= 1;
        if chord.remaining > 0 {
            return None;
        }

        let chord = self.chords.remove(&body_id)?;
        Some(ReadyBody {
            body: chord.body,
            results: chord
                .results
                .into_iter()
                .map(|r| r.unwrap_or(Value::Null))
                .collect(),
            revoked: chord.revoked,
        })
    }

    /// A header task handed its identity to `to`; the slot now waits on it.
    pub fn transfer(&mut self, from: TaskId, to: TaskId) -> bool {
        let Some(membership) = self.members.remove(&from) else {
            return false;
        };
        let (body_id, slot) = membership;
        if let Some(chord) = self.chords.get_mut(&body_id) {
            chord.header_ids[slot] = to;
        }
        self.members.insert(to, membership);
        true
    }

    /// Mark the chord with body `body_id` revoked and return the header
    /// tasks that have not reported yet. `None` if no such chord is pending.
    pub fn revoke(&mut self, body_id: TaskId) -> Option<Vec<TaskId>> {
        let chord = self.chords.get_mut(&body_id)?;
        chord.revoked = true;
        Some(
            chord
                .header_ids
                .iter()
                .zip(&chord.results)
                .filter(|(_, result)| result.is_none())
                .map(|(id, _)| *id)
                .collect(),
        )
    }

    #[cfg(test)]
    fn is_empty(&self) -> bool {
        self.chords.is_empty()
    }
}
