//! Line decoding for the optimizer's NDJSON solution stream.

use dispatch_core::{OptimizerError, SolveVrpResponse};
use futures_util::Stream;
use serde::Deserialize;
use tokio::io::{AsyncBufRead, Lines};

#[derive(Deserialize)]
#[serde(untagged)]
enum StreamLine {
    Failure { error: String },
    Solution(Box<SolveVrpResponse>),
}

fn decode_line(line: &str) -> Result<SolveVrpResponse, OptimizerError> {
    match serde_json::from_str::<StreamLine>(line) {
        Ok(StreamLine::Solution(response)) => Ok(*response),
        Ok(StreamLine::Failure { error }) => Err(OptimizerError::Stream { message: error }),
        Err(err) => Err(OptimizerError::Stream {
            message: format!("undecodable solution line: {err}"),
        }),
    }
}

/// Turn NDJSON lines into a solution stream.
///
/// Blank lines are skipped. The stream ends after the first error, whether it
/// was reported by the optimizer, raised by the transport or caused by an
/// undecodable line.
pub fn solution_stream<R>(
    lines: Lines<R>,
) -> impl Stream<Item = Result<SolveVrpResponse, OptimizerError>> + Send + 'static
where
    R: AsyncBufRead + Unpin + Send + 'static,
{
    futures_util::stream::unfold(Some(lines), |state| async move {
        let mut lines = state?;
        loop {
            match lines.next_line().await {
                Ok(Some(line)) if line.trim().is_empty() => {}
                Ok(Some(line)) => {
                    return Some(match decode_line(line.trim()) {
                        Ok(response) => (Ok(response), Some(lines)),
                        Err(err) => (Err(err), None),
                    });
                }
                Ok(None) => return None,
                Err(err) => {
                    let message = format!("failed to read solution stream: {err}");
                    return Some((Err(OptimizerError::Stream { message }), None));
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;
    use rstest::rstest;
    use std::io::Cursor;
    use tokio::io::AsyncBufReadExt;

    const SOLUTION: &str = concat!(
        r#"{"solution":{"score":{"is_valid":true,"hard_score":0,"unassigned_visits_score":4},"#,
        r#""description":{}},"optimizer_version":"v2"}"#,
    );

    async fn collect(body: impl Into<String>) -> Vec<Result<SolveVrpResponse, OptimizerError>> {
        let reader = Cursor::new(body.into().into_bytes());
        solution_stream(reader.lines()).collect().await
    }

    #[rstest]
    #[tokio::test]
    async fn decodes_each_line() {
        let items = collect(format!("{SOLUTION}\n\n{SOLUTION}\n")).await;

        assert_eq!(items.len(), 2);
        let first = items
            .first()
            .and_then(|item| item.as_ref().ok())
            .expect("first solution");
        assert_eq!(first.optimizer_version, "v2");
        assert_eq!(first.solution.score.unassigned_visits_score, 4);
    }

    #[rstest]
    #[tokio::test]
    async fn reported_errors_end_the_stream() {
        let body = format!("{SOLUTION}\n{{\"error\":\"solver crashed\"}}\n{SOLUTION}\n");
        let items = collect(body).await;

        assert_eq!(items.len(), 2);
        assert_eq!(
            items.last().and_then(|item| item.as_ref().err()),
            Some(&OptimizerError::Stream {
                message: "solver crashed".to_owned(),
            })
        );
    }

    #[rstest]
    #[tokio::test]
    async fn undecodable_lines_end_the_stream() {
        let items = collect("not json\n").await;

        assert_eq!(items.len(), 1);
        assert!(matches!(
            items.first(),
            Some(Err(OptimizerError::Stream { message })) if message.contains("undecodable")
        ));
    }

    #[rstest]
    #[tokio::test]
    async fn trailing_line_without_newline_is_read() {
        let items = collect(SOLUTION).await;
        assert_eq!(items.len(), 1);
        assert!(items.first().is_some_and(Result::is_ok));
    }
}
