use super::*;
use std::time::{Duration, Instant};

#[test]
fn test_decode_complete_lines() {
    let mut decoder = StreamDecoder::default();
    let events = decoder.push(b"{\"info\":\"game starting\"}\n{\"clock\":61000}\n");

    assert_eq!(events.len(), 2);
    assert_eq!(events[0].info_kind(), Some(StreamInfo::GameStarting));
    assert_eq!(events[1].clock, Some(61000));
    assert_eq!(decoder.pending_len(), 0);
}

#[test]
fn test_fragment_split_across_reads() {
    let mut decoder = StreamDecoder::default();

    assert!(decoder.push(b"{\"info\":\"It's your tu").is_empty());
    assert!(decoder.pending_len() > 0);
    let events = decoder.push(b"rn\",\"fen4\":\"4PC\",\"clock\":\"59000.5\"}\n");

    assert_eq!(events.len(), 1);
    assert_eq!(events[0].info_kind(), Some(StreamInfo::YourTurn));
    assert_eq!(events[0].position().as_deref(), Some("4PC"));
    assert_eq!(events[0].clock, Some(59000));
}

#[test]
fn test_multibyte_character_split_across_reads() {
    let mut decoder = StreamDecoder::default();
    let line = "{\"pgn4\":\"[Red \\\"Ærø\\\"]\"}\n".as_bytes();
    let split = line.iter().position(|&b| b >= 0x80).unwrap() + 1;

    assert!(decoder.push(&line[..split]).is_empty());
    let events = decoder.push(&line[split..]);

    assert_eq!(events.len(), 1);
    assert_eq!(events[0].pgn4.as_deref(), Some("[Red \"Ærø\"]"));
}

#[test]
fn test_unterminated_complete_object_is_decoded() {
    let mut decoder = StreamDecoder::default();
    let events = decoder.push(b"{\"info\":\"It's not your turn\"}");

    assert_eq!(events.len(), 1);
    assert_eq!(events[0].info_kind(), Some(StreamInfo::NotYourTurn));
    assert_eq!(decoder.pending_len(), 0);
}

#[test]
fn test_unterminated_object_with_trailing_spaces() {
    let mut decoder = StreamDecoder::default();

    assert!(decoder.push(b"{\"clock\":5").is_empty());
    let events = decoder.push(b"} \r");

    assert_eq!(events.len(), 1);
    assert_eq!(events[0].clock, Some(5));
    assert_eq!(decoder.pending_len(), 0);
}

#[test]
fn test_large_fragment_arriving_slowly() {
    let mut decoder = StreamDecoder::default();
    let record = "a".repeat(512 * 1024);
    let line = format!("{{\"pgn4\":\"{record}\"}}\n");

    let started = Instant::now();
    let mut events = Vec::new();
    for chunk in line.as_bytes().chunks(64) {
        events.extend(decoder.push(chunk));
    }

    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].pgn4.as_deref().map(str::len), Some(512 * 1024));
}

#[test]
fn test_garbage_and_heartbeats_are_skipped() {
    let mut decoder = StreamDecoder::default();
    let events = decoder.push(b"\n   \nnot json\n[1,2]\n{\"info\":\"no game found\"}\n");

    assert_eq!(events.len(), 1);
    assert_eq!(events[0].info_kind(), Some(StreamInfo::NoGameFound));
}

#[test]
fn test_oversized_fragment_is_dropped() {
    let mut decoder = StreamDecoder::new(16);

    assert!(decoder.push(b"{\"pgn4\":\"aaaaaaaaaaaaaaaaaaaaaaaa").is_empty());
    assert_eq!(decoder.pending_len(), 0);

    // The tail of the dropped fragment is garbage; the next line decodes.
    let events = decoder.push(b"aaaa\"}\n{\"clock\":5}\n");
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].clock, Some(5));
}

#[test]
fn test_move_position_fallback() {
    let event: StreamEvent =
        serde_json::from_str(r#"{"move":{"fen":"R-0,0\n,0,0","atMove":12}}"#).unwrap();
    assert_eq!(event.position().as_deref(), Some("R-0,0,0,0"));
    assert_eq!(event.mv.unwrap().at_move, Some(serde_json::json!(12)));
}

#[test]
fn test_info_kinds() {
    assert_eq!(StreamInfo::parse("It's your turn"), StreamInfo::YourTurn);
    assert_eq!(StreamInfo::parse("IT'S NOT YOUR TURN"), StreamInfo::NotYourTurn);
    assert_eq!(
        StreamInfo::parse("Game starting in 5"),
        StreamInfo::GameStarting
    );
    assert_eq!(
        StreamInfo::parse("Opponent left"),
        StreamInfo::Other("opponent left".to_string())
    );
}
