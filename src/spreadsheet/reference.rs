//! A1-style cell references.

/// Converts 0-based (row, col) into a reference such as `B3`.
pub(crate) fn index_to_reference(row: usize, col: usize) -> String {
    let mut letters = Vec::new();
    let mut col = col + 1;
    while col > 0 {
        let rem = (col - 1) % 26;
        letters.push(b'A' + rem as u8);
        col = (col - 1) / 26;
    }
    letters.reverse();
    format!("{}{}", String::from_utf8_lossy(&letters), row + 1)
}

/// Parses a reference such as `B3` or `$B$3` into 0-based (row, col).
pub(crate) fn reference_to_index(reference: &str) -> Option<(usize, usize)> {
    let mut col = 0usize;
    let mut row = 0usize;
    let mut has_letters = false;
    let mut has_digits = false;
    for character in reference.trim().chars().filter(|character| *character != '$') {
        match character {
            'A'..='Z' | 'a'..='z' if !has_digits => {
                has_letters = true;
                col = col.checked_mul(26)? + (character.to_ascii_uppercase() as usize - 'A' as usize + 1);
            }
            '0'..='9' if has_letters => {
                has_digits = true;
                row = row.checked_mul(10)? + character.to_digit(10)? as usize;
            }
            _ => return None,
        }
    }
    if has_digits && row > 0 {
        Some((row - 1, col - 1))
    } else {
        None
    }
}
