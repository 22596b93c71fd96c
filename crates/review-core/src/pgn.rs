//! PGN parsing utilities — lightweight regex-based parser.

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Tag-pair headers of a game.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameMetadata {
    pub white: String,
    pub black: String,
    pub result: String,
    pub date: Option<String>,
    pub event: Option<String>,
    pub eco: Option<String>,
    /// Starting FEN for non-standard games (SetUp "1").
    pub start_fen: Option<String>,
}

/// A parsed game: headers plus the main-line SAN moves.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PgnGame {
    pub metadata: GameMetadata,
    pub moves: Vec<String>,
}

/// Parse a PGN string into headers and SAN moves. Returns `None` when no
/// moves can be extracted.
pub fn parse_pgn(pgn: &str) -> Option<PgnGame> {
    let header_re = Regex::new(r#"\[(\w+)\s+"([^"]*)"\]"#).ok()?;

    let mut white = "Unknown".to_string();
    let mut black = "Unknown".to_string();
    let mut result = "*".to_string();
    let mut date = None;
    let mut event = None;
    let mut eco = None;
    let mut setup = None;
    let mut fen = None;

    for cap in header_re.captures_iter(pgn) {
        let key = &cap[1];
        let value = cap[2].to_string();
        match key {
            "White" => white = value,
            "Black" => black = value,
            "Result" => result = value,
            "Date" => date = Some(value),
            "Event" => event = Some(value),
            "ECO" => eco = Some(value),
            "SetUp" => setup = Some(value),
            "FEN" => fen = Some(value),
            _ => {}
        }
    }

    let start_fen = if setup.as_deref() == Some("1") {
        fen
    } else {
        None
    };

    let moves = extract_moves(pgn);
    if moves.is_empty() {
        return None;
    }

    Some(PgnGame {
        metadata: GameMetadata {
            white,
            black,
            result,
            date,
            event,
            eco,
            start_fen,
        },
        moves,
    })
}

/// Extract SAN moves from PGN text (after removing headers, comments, variations).
fn extract_moves(pgn: &str) -> Vec<String> {
    // Remove headers
    let header_re = Regex::new(r"\[[^\]]*\]").unwrap();
    let no_headers = header_re.replace_all(pgn, "");

    // Remove comments
    let comment_re = Regex::new(r"\{[^}]*\}").unwrap();
    let no_comments = comment_re.replace_all(&no_headers, "");

    // Remove variations
    let variation_re = Regex::new(r"\([^)]*\)").unwrap();
    let no_variations = variation_re.replace_all(&no_comments, "");

    // Extract moves
    let move_re =
        Regex::new(r"[KQRBN]?[a-h]?[1-8]?x?[a-h][1-8](?:=[QRBN])?[+#]?|O-O-O|O-O").unwrap();

    move_re
        .find_iter(&no_variations)
        .map(|m| m.as_str().to_string())
        .collect()
}

/// Extract a string value from a PGN header (e.g. WhiteElo, Termination).
pub fn extract_header(pgn: &str, header_name: &str) -> Option<String> {
    let pattern = format!(r#"\[{}\s+"([^"]*)"\]"#, regex::escape(header_name));
    let re = Regex::new(&pattern).ok()?;
    let value = re.captures(pgn)?.get(1)?.as_str().to_string();
    if value.is_empty() { None } else { Some(value) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_pgn_basic() {
        let pgn = r#"[White "Player1"]
[Black "Player2"]
[Result "1-0"]
[Date "2025.01.15"]

1. e4 e5 2. Nf3 Nc6 1-0"#;

        let game = parse_pgn(pgn).unwrap();
        assert_eq!(game.metadata.white, "Player1");
        assert_eq!(game.metadata.black, "Player2");
        assert_eq!(game.metadata.result, "1-0");
        assert_eq!(game.moves.len(), 4);
        assert_eq!(game.moves[0], "e4");
    }

    #[test]
    fn test_comments_and_variations_stripped() {
        let pgn = "1. e4 {best by test} e5 (1... c5 2. Nf3) 2. Nf3 Nc6";
        let game = parse_pgn(pgn).unwrap();
        assert_eq!(game.moves, vec!["e4", "e5", "Nf3", "Nc6"]);
    }

    #[test]
    fn test_no_moves_is_none() {
        assert!(parse_pgn(r#"[White "Nobody"]"#).is_none());
    }

    #[test]
    fn test_start_fen_only_with_setup() {
        let pgn = r#"[SetUp "1"]
[FEN "4k3/8/8/8/8/8/8/4K2R w K - 0 1"]

1. O-O Kd7"#;
        let game = parse_pgn(pgn).unwrap();
        assert!(game.metadata.start_fen.is_some());

        let plain = parse_pgn("1. e4 e5").unwrap();
        assert!(plain.metadata.start_fen.is_none());
    }
}
