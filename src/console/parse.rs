use crate::geo::{GeoPoint, GeolocationError};
use crate::protocol::Command;
use crate::types::{Member, MemberKey};

/// Parse one input line. Blank lines yield `Ok(None)`.
pub fn parse_command(line: &str) -> Result<Option<Command>, String> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let (word, rest) = match line.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim()),
        None => (line, ""),
    };

    let command = match word.to_ascii_lowercase().as_str() {
        "create" => Command::Create,
        "join" => Command::Join {
            group_id: required(rest, "join <group-id>")?.to_string(),
        },
        "leave" => Command::Leave,
        "locate" => Command::Locate(parse_fix(required(rest, LOCATE_USAGE)?)?),
        "add" => {
            let raw = required(rest, "add <member-json>")?;
            let member: Member =
                serde_json::from_str(raw).map_err(|e| format!("Invalid member JSON: {}", e))?;
            Command::Add {
                member: Box::new(member),
            }
        }
        "remove" => Command::Remove {
            key: MemberKey::new(required(rest, "remove <member-key>")?),
        },
        "clear" => Command::Clear,
        "members" => Command::Members,
        "recommend" => Command::Recommend,
        "board" => Command::Board,
        "vote" => Command::Vote {
            option: required(rest, "vote <vote-key|#n>")?.to_string(),
        },
        "pick" => Command::Pick,
        "status" => Command::Status,
        "help" | "?" => Command::Help,
        "quit" | "exit" => Command::Quit,
        other => return Err(format!("Unknown command '{}'. Type 'help'.", other)),
    };
    Ok(Some(command))
}

const LOCATE_USAGE: &str = "locate <lat> <lon> | locate denied|unavailable|timeout|unknown";

fn required<'a>(rest: &'a str, usage: &str) -> Result<&'a str, String> {
    if rest.is_empty() {
        Err(format!("Usage: {}", usage))
    } else {
        Ok(rest)
    }
}

fn parse_fix(rest: &str) -> Result<Result<GeoPoint, GeolocationError>, String> {
    if let Some(error) = GeolocationError::parse(rest) {
        return Ok(Err(error));
    }
    let mut parts = rest.split_whitespace().map(str::parse::<f64>);
    match (parts.next(), parts.next(), parts.next()) {
        (Some(Ok(latitude)), Some(Ok(longitude)), None) => {
            Ok(Ok(GeoPoint::new(latitude, longitude)))
        }
        _ => Err(format!("Usage: {}", LOCATE_USAGE)),
    }
}
