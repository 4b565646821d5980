pub mod devserver;
pub mod extractor;
pub mod fixer;
pub mod llm;
pub mod locks;
pub mod markdown;
pub mod preview;
pub mod prompt;
pub mod queue;
pub mod retry;
pub mod segmenter;
pub mod types;
pub mod workspace;

use self::types::{FileRecord, ParsedTurn, TurnContext};

/// Segment a finished turn and, once complete, extract its files.
///
/// Files and the marked preview block are only materialized for complete
/// text; a partial buffer yields the live view with no files.
pub fn finish_turn(text: &str, ctx: TurnContext) -> (ParsedTurn, Vec<FileRecord>) {
    let mut turn = segmenter::parse_turn(text, ctx);
    if !ctx.complete {
        return (turn, Vec::new());
    }
    if let Some(preview) = extractor::extract_preview(text) {
        turn.preview_html = preview;
    }
    (turn, extractor::extract_files(text))
}
