use std::collections::HashMap;
use std::fs;
use std::path::Path;

pub(super) fn load_dotenv_map(app_root: &Path) -> Result<HashMap<String, String>, std::io::Error> {
    let path = app_root.join(".env");
    if !path.is_file() {
        return Ok(HashMap::new());
    }
    let raw = fs::read_to_string(path)?;
    Ok(parse_dotenv_content(raw.as_str()))
}

pub(super) fn parse_dotenv_content(raw: &str) -> HashMap<String, String> {
    raw.lines().filter_map(parse_dotenv_line).collect()
}

fn parse_dotenv_line(line: &str) -> Option<(String, String)> {
    let mut entry = line.trim();
    if entry.is_empty() || entry.starts_with('#') {
        return None;
    }
    if let Some(rest) = entry.strip_prefix("export ") {
        entry = rest.trim_start();
    }
    let (key_raw, value_raw) = entry.split_once('=')?;
    let key = key_raw.trim();
    if key.is_empty() {
        return None;
    }
    Some((key.to_string(), unquote_value(value_raw.trim())))
}

fn unquote_value(value: &str) -> String {
    let quoted = value.len() >= 2
        && ((value.starts_with('"') && value.ends_with('"'))
            || (value.starts_with('\'') && value.ends_with('\'')));
    if quoted {
        return value[1..value.len() - 1].to_string();
    }
    match value.split_once(" #") {
        Some((before_comment, _)) => before_comment.trim_end().to_string(),
        None => value.to_string(),
    }
}
