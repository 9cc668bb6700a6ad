use std::path::Path;

use anyhow::{Context, Result};

use crate::hardware::memory::pack_word;

/// Parse the disk image text format: whitespace-separated tokens, each
/// either a decimal integer or a bare word whose first character's code is
/// used; tokens are grouped in fours and packed big-endian into one 32-bit
/// word per group, filling the disk in order until end of stream or
/// `capacity` words. A trailing partial group is zero-padded.
pub fn parse_image(text: &str, capacity: usize) -> Vec<u32> {
    let mut words = Vec::new();
    let mut group = [0u8; 4];
    let mut filled = 0;
    for token in text.split_whitespace() {
        group[filled] = token_byte(token);
        filled += 1;
        if filled == 4 {
            words.push(pack_word(group));
            group = [0; 4];
            filled = 0;
            if words.len() == capacity {
                return words;
            }
        }
    }
    if filled > 0 {
        words.push(pack_word(group));
    }
    words
}

fn token_byte(token: &str) -> u8 {
    if let Ok(value) = token.parse::<i64>() {
        return (value & 0xFF) as u8;
    }
    match token.chars().next() {
        Some(c) => (c as u32 & 0xFF) as u8,
        None => 0,
    }
}

pub fn load_image_file(path: &Path, capacity: usize) -> Result<Vec<u32>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading disk image {}", path.display()))?;
    Ok(parse_image(&text, capacity))
}
