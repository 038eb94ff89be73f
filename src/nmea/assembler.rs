//! NMEA-0183 AIS sentence assembler: validation, corrupted-prefix repair,
//! multi-fragment reassembly, and decoding into Normalized Messages
//! (spec §3, §4.2).
//!
//! Grounded line-for-line on
//! `original_source/server/src/modules/ais_parser/nmea_parser.py`.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::model::NormalizedMessage;
use crate::nmea::payload;

const IDENTIFIERS: [&str; 4] = ["AIVDM", "ABVDM", "AIVDO", "ABVDO"];

/// `(fragment_count, sequence_id, channel)` (spec §3).
type FragmentKey = (u8, String, char);

struct FragmentBuffer {
    fragments: HashMap<u8, String>,
    arrived_at: Instant,
}

#[derive(Debug, Default, Clone)]
pub struct AssemblerStats {
    pub total_parsed: u64,
    pub total_errors: u64,
    pub by_type: HashMap<u8, u64>,
    pub fragments_buffered: u64,
    pub fragments_assembled: u64,
    pub fragments_expired: u64,
    pub invalid_sentences: u64,
    pub corrupted_prefix_fixed: u64,
}

pub struct NmeaAssembler {
    fragment_buffer: HashMap<FragmentKey, FragmentBuffer>,
    fragment_timeout: Duration,
    stats: AssemblerStats,
}

impl NmeaAssembler {
    pub fn new(fragment_timeout_secs: u64) -> Self {
        Self {
            fragment_buffer: HashMap::new(),
            fragment_timeout: Duration::from_secs(fragment_timeout_secs),
            stats: AssemblerStats::default(),
        }
    }

    pub fn stats(&self) -> &AssemblerStats {
        &self.stats
    }

    pub fn fragments_in_buffer(&self) -> usize {
        self.fragment_buffer.len()
    }

    /// Parse one raw line. Returns `Some(message)` when a complete sentence
    /// (single-fragment or fully reassembled) decodes successfully.
    pub fn parse(&mut self, raw: &str) -> Option<NormalizedMessage> {
        let trimmed = raw.trim();
        let repaired = self.fix_corrupted_prefix(trimmed);

        if !Self::is_valid(&repaired) {
            self.stats.invalid_sentences += 1;
            return None;
        }

        self.expire_old_fragments();

        let is_own_ship = repaired.contains("VDO");

        let assembled = self.handle_fragments(&repaired)?;

        match Self::decode_sentence(&assembled) {
            Some(mut message) => {
                self.stats.total_parsed += 1;
                *self.stats.by_type.entry(message.msg_type).or_insert(0) += 1;
                message.is_own_ship = is_own_ship;
                message.drop_sentinels();
                Some(message)
            }
            None => {
                self.stats.total_errors += 1;
                None
            }
        }
    }

    /// Validity per spec §4.2: length >= 15, starts with `!`/`$`, contains
    /// a known AIS identifier, has a `*` checksum separator.
    fn is_valid(sentence: &str) -> bool {
        if sentence.len() < 15 {
            return false;
        }
        if !(sentence.starts_with('!') || sentence.starts_with('$')) {
            return false;
        }
        if !IDENTIFIERS.iter().any(|id| sentence.contains(id)) {
            return false;
        }
        sentence.contains('*')
    }

    /// Backward search for the last AIS identifier occurrence and, within
    /// the three preceding bytes, a `!`/`$` delimiter immediately followed
    /// by a comma after the identifier (spec §4.2 prefix repair).
    fn fix_corrupted_prefix(&mut self, sentence: &str) -> String {
        if IDENTIFIERS
            .iter()
            .any(|id| sentence.starts_with(&format!("!{id},")))
            || sentence.starts_with("$AIVDM,")
            || sentence.starts_with("$ABVDM,")
        {
            return sentence.to_string();
        }

        let bytes = sentence.as_bytes();

        for id in IDENTIFIERS {
            let Some(idx) = sentence.rfind(id) else {
                continue;
            };
            if idx == 0 {
                continue;
            }

            let mut prefix_start = idx as isize - 1;
            let floor = (idx as isize - 3).max(0);
            while prefix_start >= floor && !matches!(bytes.get(prefix_start as usize), Some(b'!') | Some(b'$')) {
                prefix_start -= 1;
            }

            if prefix_start >= 0 && matches!(bytes[prefix_start as usize], b'!' | b'$') {
                let fixed = &sentence[prefix_start as usize..];
                let after_id = id.len() + 1;
                if fixed.len() > after_id && fixed.as_bytes()[after_id] == b',' {
                    self.stats.corrupted_prefix_fixed += 1;
                    return fixed.to_string();
                }
            }
        }

        sentence.to_string()
    }

    /// Parse fields 1..4 to extract `(frag_count, frag_num, seq_id,
    /// channel)`.
    fn parse_fields(sentence: &str) -> Option<(u8, u8, String, char)> {
        let parts: Vec<&str> = sentence.split(',').collect();
        if parts.len() < 5 {
            return None;
        }
        let fragment_count: u8 = parts[1].parse().ok()?;
        let fragment_num: u8 = parts[2].parse().ok()?;
        let seq_id = if parts[3].is_empty() {
            "0".to_string()
        } else {
            parts[3].to_string()
        };
        let channel = parts[4].chars().next().unwrap_or('A');
        Some((fragment_count, fragment_num, seq_id, channel))
    }

    /// Returns the fully assembled sentence (itself, for single-fragment
    /// sentences; the fragment-1 sentence standing in for the joined
    /// payload otherwise) once all fragments 1..N have arrived, else
    /// `None`.
    fn handle_fragments(&mut self, sentence: &str) -> Option<AssembledSentence> {
        let Some((frag_count, frag_num, seq_id, channel)) = Self::parse_fields(sentence) else {
            return Some(AssembledSentence::Single(sentence.to_string()));
        };

        if frag_count <= 1 {
            return Some(AssembledSentence::Single(sentence.to_string()));
        }

        let key: FragmentKey = (frag_count, seq_id, channel);
        let buffer = self.fragment_buffer.entry(key.clone()).or_insert_with(|| FragmentBuffer {
            fragments: HashMap::new(),
            arrived_at: Instant::now(),
        });
        buffer.fragments.insert(frag_num, sentence.to_string());
        buffer.arrived_at = Instant::now();
        self.stats.fragments_buffered += 1;

        let complete = (1..=frag_count).all(|n| buffer.fragments.contains_key(&n));
        if !complete {
            return None;
        }

        let buffer = self.fragment_buffer.remove(&key).unwrap();
        self.stats.fragments_assembled += 1;

        let ordered: Vec<String> = (1..=frag_count)
            .map(|n| buffer.fragments.get(&n).unwrap().clone())
            .collect();
        Some(AssembledSentence::Fragments(ordered))
    }

    fn expire_old_fragments(&mut self) {
        let now = Instant::now();
        let timeout = self.fragment_timeout;
        let expired_keys: Vec<FragmentKey> = self
            .fragment_buffer
            .iter()
            .filter(|(_, buf)| now.duration_since(buf.arrived_at) > timeout)
            .map(|(key, _)| key.clone())
            .collect();

        for key in expired_keys {
            if let Some(buf) = self.fragment_buffer.remove(&key) {
                self.stats.fragments_expired += buf.fragments.len() as u64;
            }
        }
    }

    /// Extract and concatenate the payload field(s), then decode.
    fn decode_sentence(assembled: &AssembledSentence) -> Option<NormalizedMessage> {
        let sentences: &[String] = match assembled {
            AssembledSentence::Single(s) => std::slice::from_ref(s),
            AssembledSentence::Fragments(v) => v.as_slice(),
        };

        let mut payload = String::new();
        let mut fill_bits: u8 = 0;

        for sentence in sentences {
            let without_checksum = sentence.split('*').next()?;
            let parts: Vec<&str> = without_checksum.split(',').collect();
            if parts.len() < 7 {
                return None;
            }
            payload.push_str(parts[5]);
            fill_bits = parts[6].parse().unwrap_or(0);
        }

        payload::decode(&payload, fill_bits)
    }
}

enum AssembledSentence {
    Single(String),
    Fragments(Vec<String>),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_too_short_sentence() {
        assert!(!NmeaAssembler::is_valid("!AIVDM,1*00"));
    }

    #[test]
    fn rejects_missing_identifier() {
        assert!(!NmeaAssembler::is_valid("!GPGGA,1,1,,A,payloadpayload*00"));
    }

    #[test]
    fn rejects_missing_checksum_separator() {
        assert!(!NmeaAssembler::is_valid("!AIVDM,1,1,,A,payloadpayload00"));
    }

    #[test]
    fn accepts_well_formed_sentence() {
        assert!(NmeaAssembler::is_valid(
            "!AIVDM,1,1,,B,15NPOOPP00o?b=bE`UNv4?wN0HRq,0*63"
        ));
    }

    #[test]
    fn repairs_corrupted_prefix() {
        let mut assembler = NmeaAssembler::new(60);
        let corrupted = "XX!AIVDM,1,1,,B,15NPOOPP00o?b=bE`UNv4?wN0HRq,0*63";
        let fixed = assembler.fix_corrupted_prefix(corrupted);
        assert_eq!(fixed, "!AIVDM,1,1,,B,15NPOOPP00o?b=bE`UNv4?wN0HRq,0*63");
        assert_eq!(assembler.stats().corrupted_prefix_fixed, 1);
    }

    #[test]
    fn leaves_well_formed_sentence_untouched() {
        let mut assembler = NmeaAssembler::new(60);
        let good = "!AIVDM,1,1,,B,15NPOOPP00o?b=bE`UNv4?wN0HRq,0*63";
        assert_eq!(assembler.fix_corrupted_prefix(good), good);
        assert_eq!(assembler.stats().corrupted_prefix_fixed, 0);
    }

    #[test]
    fn single_fragment_sentence_decodes_directly() {
        let mut assembler = NmeaAssembler::new(60);
        let message = assembler
            .parse("!AIVDM,1,1,,B,15NPOOPP00o?b=bE`UNv4?wN0HRq,0*63")
            .expect("should decode");
        assert_eq!(message.msg_type, 1);
        assert_eq!(assembler.stats().total_parsed, 1);
    }

    #[test]
    fn own_ship_sentences_are_tagged() {
        let mut assembler = NmeaAssembler::new(60);
        let message = assembler
            .parse("!AIVDO,1,1,,B,15NPOOPP00o?b=bE`UNv4?wN0HRq,0*6E")
            .expect("should decode");
        assert!(message.is_own_ship);
    }

    #[test]
    fn invalid_sentence_is_counted_and_dropped() {
        let mut assembler = NmeaAssembler::new(60);
        assert!(assembler.parse("garbage").is_none());
        assert_eq!(assembler.stats().invalid_sentences, 1);
    }

    #[test]
    fn s3_two_part_fragment_is_buffered_then_assembled() {
        let mut assembler = NmeaAssembler::new(60);
        // Split the known-good single-fragment payload across two fragments.
        let full_payload = "15NPOOPP00o?b=bE`UNv4?wN0HRq";
        let (first, second) = full_payload.split_at(14);

        let result_1 = assembler.parse(&format!("!AIVDM,2,1,3,A,{first},0*1A"));
        assert!(result_1.is_none(), "first fragment alone should not decode");
        assert_eq!(assembler.fragments_in_buffer(), 1);

        let result_2 = assembler.parse(&format!("!AIVDM,2,2,3,A,{second},0*1B"));
        assert!(result_2.is_some(), "second fragment completes the message");
        assert_eq!(assembler.stats().fragments_assembled, 1);
        assert_eq!(assembler.fragments_in_buffer(), 0);
    }

    #[test]
    fn s3_incomplete_fragment_expires_after_timeout() {
        let mut assembler = NmeaAssembler::new(0);
        let _ = assembler.parse("!AIVDM,2,1,3,A,15NPOOPP00,0*1A");
        assert_eq!(assembler.fragments_in_buffer(), 1);

        std::thread::sleep(Duration::from_millis(5));
        // Any subsequent parse call runs the amortized sweep.
        let _ = assembler.parse("!AIVDM,2,1,4,A,15NPOOPP00,0*1A");
        assert_eq!(assembler.stats().fragments_expired, 1);
    }
}
