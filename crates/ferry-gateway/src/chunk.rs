/// Splits a reply into pieces of at most `max_chars` characters each.
///
/// Lines are packed greedily: a line joins the current piece when it still
/// fits together with the separating newline, otherwise it starts a new
/// piece. A single line longer than `max_chars` is hard-split at character
/// boundaries. Joining the pieces back with their original separators
/// reconstructs the input.
pub fn chunk_message(text: &str, max_chars: usize) -> Vec<String> {
    if text.is_empty() {
        return Vec::new();
    }
    if max_chars == 0 {
        return vec![text.to_string()];
    }

    let mut pieces = Vec::new();
    let mut current = String::new();
    let mut current_chars = 0_usize;
    let mut current_has_lines = false;

    for line in text.split('\n') {
        let line_chars = line.chars().count();

        if line_chars > max_chars {
            if current_has_lines {
                pieces.push(std::mem::take(&mut current));
            }
            let chars: Vec<char> = line.chars().collect();
            let mut start = 0_usize;
            while chars.len() - start > max_chars {
                pieces.push(chars[start..start + max_chars].iter().collect());
                start += max_chars;
            }
            // The tail of a hard-split line keeps packing with later lines.
            current = chars[start..].iter().collect();
            current_chars = chars.len() - start;
            current_has_lines = true;
            continue;
        }

        if current_has_lines && current_chars + 1 + line_chars > max_chars {
            pieces.push(std::mem::take(&mut current));
            current_chars = 0;
            current_has_lines = false;
        }
        if current_has_lines {
            current.push('\n');
            current_chars += 1;
        }
        current.push_str(line);
        current_chars += line_chars;
        current_has_lines = true;
    }

    if current_has_lines && !current.is_empty() {
        pieces.push(current);
    }
    pieces
}
