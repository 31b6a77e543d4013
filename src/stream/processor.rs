use futures::{Stream, StreamExt};

use crate::errors::{CouchError, Result};
use crate::logger::Logger;
use crate::row::Row;
use crate::stream::scanner::RowScanner;

/// The single terminal outcome of a streamed query.
///
/// Whichever of success or failure is recorded first wins; later attempts
/// to settle are ignored and reported back as `false`.
#[derive(Debug, Default)]
pub struct Settlement {
    outcome: Option<Result<usize>>,
}

impl Settlement {
    pub fn resolve(&mut self, rows: usize) -> bool {
        self.settle(Ok(rows))
    }

    pub fn reject(&mut self, err: CouchError) -> bool {
        self.settle(Err(err))
    }

    fn settle(&mut self, outcome: Result<usize>) -> bool {
        if self.outcome.is_some() {
            return false;
        }
        self.outcome = Some(outcome);
        true
    }

    pub fn is_settled(&self) -> bool {
        self.outcome.is_some()
    }

    /// Consumes the settlement. An unsettled one counts as a truncated body.
    pub fn into_result(self) -> Result<usize> {
        self.outcome.unwrap_or_else(|| {
            Err(CouchError::Parse("stream ended without a result".to_string()))
        })
    }
}

/// Feeds a response body through the [`RowScanner`] and hands each row to a
/// consumer.
#[derive(Debug, Clone)]
pub struct RowStreamProcessor {
    logger: Logger,
}

impl RowStreamProcessor {
    pub fn new(logger: Logger) -> Self {
        Self { logger }
    }

    /// Delivers every row of `body` to `on_row`, in order, one at a time.
    ///
    /// The next chunk is not read before `on_row` has returned for all rows
    /// completed so far. If `on_row` fails, no further rows are delivered,
    /// the body is dropped, and the failure is returned as
    /// [`CouchError::Callback`].
    ///
    /// # Returns
    ///
    /// The number of rows delivered.
    ///
    /// # Errors
    ///
    /// A malformed or truncated body yields [`CouchError::Parse`]; an error
    /// item from `body` is returned unchanged. Only the first failure is
    /// reported.
    pub async fn process<S, B, F, E>(&self, body: S, mut on_row: F) -> Result<usize>
    where
        S: Stream<Item = Result<B>>,
        B: AsRef<[u8]>,
        F: FnMut(Row) -> std::result::Result<(), E>,
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let mut body = std::pin::pin!(body);
        let mut scanner = RowScanner::new();
        let mut settlement = Settlement::default();
        let mut completed = Vec::new();
        let mut delivered = 0usize;

        while !settlement.is_settled() {
            let (scanned, at_end) = match body.next().await {
                Some(Ok(chunk)) => (scanner.feed(chunk.as_ref(), &mut completed), false),
                Some(Err(err)) => {
                    self.logger.error(format_args!("Network error during stream query: {}", err));
                    (Err(err), false)
                }
                None => (scanner.finish(&mut completed), true),
            };

            for raw in completed.drain(..) {
                let row: Row = match serde_json::from_slice(&raw) {
                    Ok(row) => row,
                    Err(e) => {
                        settlement.reject(CouchError::Parse(format!("invalid row: {}", e)));
                        break;
                    }
                };
                delivered += 1;
                if let Err(e) = on_row(row) {
                    settlement.reject(CouchError::Callback(e.into()));
                    break;
                }
            }

            match scanned {
                Err(err) => {
                    if !settlement.reject(err) {
                        self.logger
                            .debug(format_args!("Ignoring error after the stream was settled"));
                    }
                }
                Ok(()) if at_end => {
                    settlement.resolve(delivered);
                }
                Ok(()) => {}
            }
        }

        match settlement.into_result() {
            Ok(rows) => {
                self.logger.info(format_args!("Stream completed, processed {} rows", rows));
                Ok(rows)
            }
            Err(err) => {
                self.logger.error(format_args!("Stream query failed: {}", err));
                Err(err)
            }
        }
    }
}
