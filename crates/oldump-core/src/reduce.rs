//! Latest-version reducer: one row per live key.
//!
//! Input must be grouped by key in ascending order (the sorter's output).
//! For each group the entry with the highest revision wins, the later entry
//! winning a revision tie. A group whose winner is deleted emits nothing.

use crate::error::{DumpError, Result};
use crate::record::HistoryEntry;
use serde::Serialize;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReduceStats {
    pub entries: u64,
    pub groups: u64,
    pub emitted: u64,
    pub deleted: u64,
}

pub struct LatestRevisions<I> {
    input: I,
    winner: Option<HistoryEntry>,
    stats: ReduceStats,
    finished: bool,
}

impl<I> LatestRevisions<I>
where
    I: Iterator<Item = Result<HistoryEntry>>,
{
    pub fn new(input: I) -> Self {
        Self {
            input,
            winner: None,
            stats: ReduceStats::default(),
            finished: false,
        }
    }

    pub fn stats(&self) -> &ReduceStats {
        &self.stats
    }

    /// Close the current group; returns its winner if it is live.
    fn close_group(&mut self, winner: HistoryEntry) -> Option<HistoryEntry> {
        self.stats.groups += 1;
        if winner.deleted {
            self.stats.deleted += 1;
            None
        } else {
            self.stats.emitted += 1;
            Some(winner)
        }
    }
}

impl<I> Iterator for LatestRevisions<I>
where
    I: Iterator<Item = Result<HistoryEntry>>,
{
    type Item = Result<HistoryEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.finished {
            let entry = match self.input.next() {
                Some(Ok(entry)) => entry,
                Some(Err(e)) => {
                    self.finished = true;
                    return Some(Err(e));
                }
                None => {
                    self.finished = true;
                    let winner = self.winner.take()?;
                    return self.close_group(winner).map(Ok);
                }
            };
            self.stats.entries += 1;

            let Some(current) = self.winner.take() else {
                self.winner = Some(entry);
                continue;
            };

            if entry.key == current.key {
                self.winner = Some(if entry.revision >= current.revision {
                    entry
                } else {
                    current
                });
                continue;
            }

            if entry.key < current.key {
                self.finished = true;
                return Some(Err(DumpError::Unsorted {
                    previous: current.key,
                    key: entry.key,
                }));
            }

            self.winner = Some(entry);
            if let Some(row) = self.close_group(current) {
                return Some(Ok(row));
            }
        }
        None
    }
}
