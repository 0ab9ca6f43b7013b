//! Minimal RFC 4180 codec for the attendance ledger.
//!
//! Rows end in `\n`. Fields are quoted only when they contain a comma,
//! a quote, CR or LF; embedded quotes are doubled.

pub(crate) fn encode_row(fields: &[&str]) -> String {
    let mut line = String::new();
    for (i, field) in fields.iter().enumerate() {
        if i > 0 {
            line.push(',');
        }
        if field.contains([',', '"', '\r', '\n']) {
            line.push('"');
            line.push_str(&field.replace('"', "\"\""));
            line.push('"');
        } else {
            line.push_str(field);
        }
    }
    line.push('\n');
    line
}

/// Parse complete rows. Text that does not end in a row terminator is a
/// torn write and is rejected rather than guessed at.
pub(crate) fn parse(text: &str) -> Result<Vec<Vec<String>>, String> {
    let mut rows = Vec::new();
    let mut row = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut field_started = false;
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        if in_quotes {
            match c {
                '"' if chars.peek() == Some(&'"') => {
                    chars.next();
                    field.push('"');
                }
                '"' => in_quotes = false,
                _ => field.push(c),
            }
            continue;
        }

        match c {
            '"' if !field_started => {
                in_quotes = true;
                field_started = true;
            }
            '"' => return Err(format!("stray quote in row {}", rows.len() + 1)),
            ',' => {
                row.push(std::mem::take(&mut field));
                field_started = false;
            }
            '\r' if chars.peek() == Some(&'\n') => {}
            '\n' => {
                row.push(std::mem::take(&mut field));
                rows.push(std::mem::take(&mut row));
                field_started = false;
            }
            _ => {
                field.push(c);
                field_started = true;
            }
        }
    }

    if in_quotes {
        return Err(format!("unterminated quoted field in row {}", rows.len() + 1));
    }
    if field_started || !field.is_empty() || !row.is_empty() {
        return Err(format!("row {} is missing its terminator", rows.len() + 1));
    }
    Ok(rows)
}

/// Whether `bytes` end exactly after a row terminator that is not inside
/// a quoted field. Doubled quotes flip the state twice, so parity is enough.
pub(crate) fn ends_at_row_boundary(bytes: &[u8]) -> bool {
    let in_quotes = bytes.iter().filter(|&&b| b == b'"').count() % 2 == 1;
    !in_quotes && bytes.last() == Some(&b'\n')
}
