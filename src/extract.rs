//! Extraction of [`RequestRecord`]s from the content of a single log file.
//!
//! [`Requests`] is a lazy, single-pass iterator over the lines of one file. Lines that are not
//! applicable or that carry a malformed timestamp are skipped (and counted in an
//! [`ExtractSummary`]), they never fail the file.
use std::borrow::Cow;
use std::iter::Enumerate;
use std::slice::Split;

use tracing::{debug, warn};

use crate::trace::{Classification, Classifier, LogLine, RequestRecord};

/// Per-file line accounting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExtractSummary {
    /// Lines turned into a [`RequestRecord`]
    pub matched: usize,
    /// Lines outside of scope (other loggers, other request kinds, excluded clients)
    pub skipped: usize,
    /// Request lines that could not be parsed
    pub malformed: usize,
}

type NewlineFn = fn(&u8) -> bool;

#[inline]
fn is_newline(b: &u8) -> bool {
    *b == b'\n'
}

pub struct Requests<'a> {
    file: &'a str,
    lines: Enumerate<Split<'a, u8, NewlineFn>>,
    classifier: Classifier,
    summary: ExtractSummary,
}

impl<'a> Requests<'a> {
    /// Accounting of the lines consumed so far.
    #[inline]
    pub fn summary(&self) -> ExtractSummary {
        self.summary
    }
}

impl<'a> Iterator for Requests<'a> {
    type Item = RequestRecord;

    fn next(&mut self) -> Option<Self::Item> {
        for (idx, bytes) in self.lines.by_ref() {
            // broker logs are ASCII, invalid bytes can only appear in foreign lines
            let text: Cow<'_, str> = String::from_utf8_lossy(bytes);
            let text = text.trim_end_matches('\r');

            if text.trim().is_empty() {
                continue;
            }

            let number = idx + 1;
            let line = LogLine::new(self.file, number, text);

            match self.classifier.classify(&line) {
                Ok(Classification::Request(record)) => {
                    self.summary.matched += 1;
                    return Some(record);
                }
                Ok(Classification::NotApplicable(reason)) => {
                    self.summary.skipped += 1;
                    debug!(
                        file = self.file,
                        line = number,
                        reason = reason.as_str(),
                        "skipping line"
                    );
                }
                Err(e) => {
                    self.summary.malformed += 1;
                    warn!(
                        file = self.file,
                        line = number,
                        raw = text,
                        error = %e,
                        "skipping malformed trace line"
                    );
                }
            }
        }
        None
    }
}

/// Lazily extract request records from decompressed file `content`.
///
/// `file` identifies the content in provenance fields and logs only.
pub fn extract<'a>(content: &'a [u8], file: &'a str, classifier: Classifier) -> Requests<'a> {
    Requests {
        file,
        lines: content.split(is_newline as NewlineFn).enumerate(),
        classifier,
        summary: ExtractSummary::default(),
    }
}
