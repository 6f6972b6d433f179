//! A1-notation helpers. Rows and columns are 0-based in the grid form.

/// Splits `C12` into `(row 11, column 2)`. Returns `None` for anything that is
/// not uppercase letters followed by digits.
pub fn parse_a1(address: &str) -> Option<(u32, u32)> {
    let split = address.find(|c: char| !c.is_ascii_uppercase())?;
    let (letters, digits) = address.split_at(split);
    if letters.is_empty() || digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }

    let mut column: u32 = 0;
    for b in letters.bytes() {
        column = column.checked_mul(26)?.checked_add(u32::from(b - b'A') + 1)?;
    }
    let row: u32 = digits.parse().ok()?;
    if row == 0 {
        return None;
    }
    Some((row - 1, column - 1))
}

/// 0-based column index to letters: 0 → `A`, 26 → `AA`.
pub fn column_letters(column: u32) -> String {
    let mut n = column + 1;
    let mut letters = Vec::new();
    while n > 0 {
        let rem = (n - 1) % 26;
        letters.push(char::from(b'A' + rem as u8));
        n = (n - 1) / 26;
    }
    letters.iter().rev().collect()
}

pub fn to_a1(row: u32, column: u32) -> String {
    format!("{}{}", column_letters(column), row + 1)
}

/// Quoted range prefix for a worksheet title: `'貼り付け用'!C5`.
pub fn qualified(worksheet: &str, range: &str) -> String {
    format!("'{}'!{}", worksheet.replace('\'', "''"), range)
}
