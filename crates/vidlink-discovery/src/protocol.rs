//! Directory wire protocol: space-delimited ASCII, one send per request.
//!
//! | Request                              | Success                          | Failure            |
//! |--------------------------------------|----------------------------------|--------------------|
//! | `REGISTER nick ip port pass t1#t2`   | `OK WELCOME [ts]`                | `NOK WRONG_PASS`   |
//! | `QUERY nick`                         | `OK USER_FOUND nick ip port t1#t2` | `NOK USER_UNKNOWN` |
//! | `LIST_USERS`                         | `OK USERS_LIST N nick ip port ts#nick ip port ts#...#` | `NOK USER_UNKNOWN` |
//! | `QUIT`                               | `BYE`                            |                    |

use vidlink_core::{DirectoryError, PeerRecord, UserRecord};

pub const PROTOCOL_SEPARATOR: char = '#';

pub fn register_request(nick: &str, ip: &str, port: u16, password: &str, protocols: &[&str]) -> String {
    format!(
        "REGISTER {nick} {ip} {port} {password} {}",
        protocols.join(&PROTOCOL_SEPARATOR.to_string())
    )
}

pub fn query_request(nick: &str) -> String {
    format!("QUERY {nick}")
}

pub const LIST_USERS_REQUEST: &str = "LIST_USERS";
pub const QUIT_REQUEST: &str = "QUIT";
pub const QUIT_REPLY: &str = "BYE";

fn malformed(reply: &str) -> DirectoryError {
    DirectoryError::Malformed { response: reply.to_owned() }
}

/// `OK WELCOME [nick] [ts]` → registration timestamp (`"0"` when omitted).
pub fn parse_register_reply(reply: &str) -> Result<String, DirectoryError> {
    let words: Vec<&str> = reply.split_whitespace().collect();
    match words.as_slice() {
        [] | [_] => Err(DirectoryError::NoResponse),
        ["OK", "WELCOME"] => Ok("0".to_owned()),
        ["OK", "WELCOME", .., ts] => Ok((*ts).to_owned()),
        ["NOK", "WRONG_PASS", ..] => Err(DirectoryError::WrongPassword),
        _ => Err(malformed(reply)),
    }
}

/// `OK USER_FOUND nick ip port tags` → [`PeerRecord`].
pub fn parse_query_reply(reply: &str) -> Result<PeerRecord, DirectoryError> {
    let words: Vec<&str> = reply.split_whitespace().collect();
    match words.as_slice() {
        [] | [_] => Err(DirectoryError::NoResponse),
        ["OK", "USER_FOUND", nick, ip, port, tags, ..] => {
            let port = port.parse().map_err(|_| malformed(reply))?;
            Ok(PeerRecord {
                nick: (*nick).to_owned(),
                ip: (*ip).to_owned(),
                port,
                protocols: tags
                    .split(PROTOCOL_SEPARATOR)
                    .filter(|t| !t.is_empty())
                    .map(str::to_owned)
                    .collect(),
            })
        }
        ["NOK", "USER_UNKNOWN", ..] => Err(DirectoryError::UserUnknown),
        _ => Err(malformed(reply)),
    }
}

/// Parse a (possibly partial) `LIST_USERS` reply.
///
/// Returns `Ok(None)` while fewer records than the advertised count have
/// arrived. Records look like `nick ip port ts#`, and the next nickname is
/// glued to the `#` that closes the previous record. Nicknames may contain
/// `#` themselves, so records are walked whole and only the `ts#` token
/// terminates one. Timestamps never contain `#`.
pub fn parse_user_list(reply: &str) -> Result<Option<Vec<UserRecord>>, DirectoryError> {
    let words: Vec<&str> = reply.split_whitespace().collect();
    match words.as_slice() {
        [] => return Ok(None),
        ["OK"] | ["OK", "USERS_LIST"] => return Ok(None),
        ["OK", "USERS_LIST", ..] => {}
        _ => return Err(malformed(reply)),
    }

    let count: usize = words[2].parse().map_err(|_| malformed(reply))?;
    let mut records = Vec::with_capacity(count);
    let mut tokens = words[3..].iter().copied();
    // nickname carried over from the `ts#nick` token of the previous record
    let mut carried: Option<&str> = None;

    while records.len() < count {
        let nick = match carried.take() {
            Some(n) if !n.is_empty() => n,
            _ => match tokens.next() {
                Some(t) => t,
                None => return Ok(None),
            },
        };
        let (Some(ip), Some(port), Some(tail)) = (tokens.next(), tokens.next(), tokens.next())
        else {
            return Ok(None);
        };
        let Some((ts, next_nick)) = tail.split_once(PROTOCOL_SEPARATOR) else {
            // timestamp still arriving
            return Ok(None);
        };
        records.push(UserRecord {
            nick: nick.to_owned(),
            ip: ip.to_owned(),
            port: port.to_owned(),
            timestamp: ts.to_owned(),
        });
        carried = Some(next_nick);
    }

    Ok(Some(records))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_request_joins_tags() {
        assert_eq!(
            register_request("alice", "10.0.0.1", 9000, "pw", &["V0", "V1"]),
            "REGISTER alice 10.0.0.1 9000 pw V0#V1"
        );
    }

    #[test]
    fn register_replies() {
        assert_eq!(parse_register_reply("OK WELCOME alice 1589000000.5").unwrap(), "1589000000.5");
        assert_eq!(parse_register_reply("OK WELCOME").unwrap(), "0");
        assert!(matches!(parse_register_reply("NOK WRONG_PASS"), Err(DirectoryError::WrongPassword)));
        assert!(matches!(parse_register_reply(""), Err(DirectoryError::NoResponse)));
        assert!(matches!(parse_register_reply("HELLO THERE"), Err(DirectoryError::Malformed { .. })));
    }

    #[test]
    fn query_replies() {
        let peer = parse_query_reply("OK USER_FOUND bob 10.0.0.2 8080 V0#V1").unwrap();
        assert_eq!(peer.nick, "bob");
        assert_eq!(peer.port, 8080);
        assert_eq!(peer.protocols, vec!["V0", "V1"]);
        assert!(peer.supports_loss_reports());

        assert!(matches!(parse_query_reply("NOK USER_UNKNOWN"), Err(DirectoryError::UserUnknown)));
        assert!(matches!(
            parse_query_reply("OK USER_FOUND bob 10.0.0.2"),
            Err(DirectoryError::Malformed { .. })
        ));
        assert!(matches!(
            parse_query_reply("OK USER_FOUND bob 10.0.0.2 port V0"),
            Err(DirectoryError::Malformed { .. })
        ));
    }

    #[test]
    fn user_list_complete() {
        let reply = "OK USERS_LIST 2 alice 10.0.0.1 9000 1589000000.1#bob 10.0.0.2 9100 1589000000.2#";
        let users = parse_user_list(reply).unwrap().unwrap();
        assert_eq!(users.len(), 2);
        assert_eq!(users[0].nick, "alice");
        assert_eq!(users[1].ip, "10.0.0.2");
        assert_eq!(users[1].timestamp, "1589000000.2");
    }

    #[test]
    fn user_list_with_separator_in_nicknames() {
        let reply = "OK USERS_LIST 3 mua#ja#ja 1.1.1.1 1 11.0#carol 2.2.2.2 2 22.0#x#y 3.3.3.3 3 33.0#";
        let users = parse_user_list(reply).unwrap().unwrap();
        assert_eq!(users.len(), 3);
        assert_eq!(users[0].nick, "mua#ja#ja");
        assert_eq!(users[1].nick, "carol");
        assert_eq!(users[2].nick, "x#y");
        assert_eq!(users[2].port, "3");
        assert_eq!(users[2].timestamp, "33.0");
    }

    #[test]
    fn user_list_partial_fragments() {
        assert_eq!(parse_user_list("OK USERS_LIST").unwrap(), None);
        assert_eq!(parse_user_list("OK USERS_LIST 2 alice 10.0.0.1 9000 15890").unwrap(), None);
        assert_eq!(
            parse_user_list("OK USERS_LIST 2 alice 10.0.0.1 9000 1.0#bo").unwrap(),
            None
        );
        assert_eq!(parse_user_list("OK USERS_LIST 0").unwrap(), Some(vec![]));
    }

    #[test]
    fn user_list_rejects_garbage() {
        assert!(parse_user_list("NOK USER_UNKNOWN").is_err());
        assert!(parse_user_list("OK USERS_LIST many").is_err());
    }
}
