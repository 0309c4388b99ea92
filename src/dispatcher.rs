//! Dispatcher / Command Surface (spec §4.7).
//!
//! Parses one chat message into a [`Command`]: either a new [`TaskConfig`]
//! for mirror/leech/clone, a merge-session action, or a simple verb with no
//! flag payload. Ported from the original bot's `arg_parser` token scan,
//! which walked the message's whitespace-split tokens once, classifying
//! each as a boolean flag, a valued flag, or (position zero) the link.

use std::collections::HashMap;
use std::path::PathBuf;

use crate::Result;
use crate::config::{FileCollisionAction, WatermarkPosition};
use crate::error::DispatchError;
use crate::types::TaskId;

/// Flags that take no argument; everything else in the recognized set
/// consumes the next token.
const BOOLEAN_FLAGS: &[&str] = &[
    "-z", "-e", "-s", "-sv", "-ss", "-hl", "-ut", "-bt", "-doc", "-med",
];

/// Every flag the dispatcher recognizes, boolean or valued.
const KNOWN_FLAGS: &[&str] = &[
    "-n", "-up", "-rcf", "-i", "-b", "-m", "-d", "-s", "-z", "-e", "-sv", "-ss", "-ca", "-cv",
    "-md", "-hl", "-ut", "-bt", "-doc", "-med", "-tl", "-sp", "-t", "-ns", "-au", "-ap", "-h",
];

/// Task kind, selecting the sink the dispatcher wires up (spec §9's
/// dispatch-table-over-inheritance design note).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TaskKind {
    Mirror,
    Leech,
    Clone,
}

/// Immutable configuration produced by the dispatcher for one new task
/// (spec §3 `TaskConfig`). Discarded on finalize.
#[derive(Clone, Debug)]
pub struct TaskConfig {
    pub id: TaskId,
    pub kind: TaskKind,
    pub owner_id: i64,
    pub chat_id: i64,
    pub reply_id: Option<i64>,
    pub link: String,
    pub tag: Option<String>,
    pub name_override: Option<String>,
    pub up_dest: Option<String>,
    pub rclone_flags: Option<String>,
    pub consume_next: u32,
    pub bulk_range: Option<(Option<u32>, Option<u32>)>,
    pub same_dir_key: Option<String>,
    pub seed: bool,
    pub seed_ratio_time: Option<String>,
    pub select: bool,
    pub compress: bool,
    pub extract: bool,
    pub extract_password: Option<String>,
    pub sample_video: bool,
    pub screenshots: bool,
    pub convert_audio_ext: Option<String>,
    pub convert_video_ext: Option<String>,
    pub metadata_title: Option<String>,
    pub hybrid_leech: bool,
    pub force_user_transmission: bool,
    pub force_bot_transmission: bool,
    pub force_document: bool,
    pub force_media: bool,
    pub thumbnail_layout: Option<String>,
    pub split_size_override: Option<u64>,
    pub thumbnail_source: Option<String>,
    pub name_substitution: Option<String>,
    pub http_auth: Option<(String, String)>,
    pub http_headers: Option<String>,
    pub included_extensions: Vec<String>,
    pub excluded_extensions: Vec<String>,
    pub file_collision: FileCollisionAction,
    pub watermark_position: WatermarkPosition,
}

/// A parsed command, ready for the engine to act on.
#[derive(Debug)]
pub enum Command {
    NewTask(Box<TaskConfig>),
    MergeStart { owner_id: i64, chat_id: i64 },
    MergeAdd { owner_id: i64, input: String },
    MergeCommit { owner_id: i64 },
    MergeCancel { owner_id: i64 },
    Cancel { owner_id: i64, task_ref: String },
    CancelAll { owner_id: i64 },
    CancelMulti { owner_id: i64, filter: String },
    ForceStart { owner_id: i64, task_ref: String },
    Select { owner_id: i64, task_ref: String },
    Status,
    Rss(String),
    Stats,
    Ping,
    Log,
    Restart,
    SettingsBot,
    SettingsUser { owner_id: i64 },
    Speedtest,
    Mediainfo { task_ref: String },
    Exec { script: String },
}

/// What the caller supplies about the message being parsed: the verb
/// already stripped of its leading `/`, the remaining text, and whether
/// the message is a reply to a media attachment (used as a link fallback).
pub struct IncomingMessage<'a> {
    pub verb: &'a str,
    pub rest: &'a str,
    pub owner_id: i64,
    pub chat_id: i64,
    pub reply_id: Option<i64>,
    pub reply_is_media: bool,
}

/// Parse one message into a [`Command`].
pub fn dispatch(msg: &IncomingMessage<'_>) -> Result<Command> {
    match msg.verb {
        "mirror" => Ok(Command::NewTask(Box::new(parse_task(
            TaskKind::Mirror,
            msg,
        )?))),
        "leech" => Ok(Command::NewTask(Box::new(parse_task(
            TaskKind::Leech,
            msg,
        )?))),
        "clone" => Ok(Command::NewTask(Box::new(parse_task(
            TaskKind::Clone,
            msg,
        )?))),
        "merge" => {
            if msg.rest.trim().is_empty() {
                Ok(Command::MergeStart {
                    owner_id: msg.owner_id,
                    chat_id: msg.chat_id,
                })
            } else {
                Ok(Command::MergeAdd {
                    owner_id: msg.owner_id,
                    input: msg.rest.trim().to_string(),
                })
            }
        }
        "merge-commit" => Ok(Command::MergeCommit {
            owner_id: msg.owner_id,
        }),
        "merge-cancel" => Ok(Command::MergeCancel {
            owner_id: msg.owner_id,
        }),
        "cancel" => Ok(Command::Cancel {
            owner_id: msg.owner_id,
            task_ref: msg.rest.trim().to_string(),
        }),
        "cancel-all" => Ok(Command::CancelAll {
            owner_id: msg.owner_id,
        }),
        "cancel-multi" => Ok(Command::CancelMulti {
            owner_id: msg.owner_id,
            filter: msg.rest.trim().to_string(),
        }),
        "force-start" => Ok(Command::ForceStart {
            owner_id: msg.owner_id,
            task_ref: msg.rest.trim().to_string(),
        }),
        "select" => Ok(Command::Select {
            owner_id: msg.owner_id,
            task_ref: msg.rest.trim().to_string(),
        }),
        "status" => Ok(Command::Status),
        "rss" => Ok(Command::Rss(msg.rest.trim().to_string())),
        "stats" => Ok(Command::Stats),
        "ping" => Ok(Command::Ping),
        "log" => Ok(Command::Log),
        "restart" => Ok(Command::Restart),
        "settings-bot" => Ok(Command::SettingsBot),
        "settings-user" => Ok(Command::SettingsUser {
            owner_id: msg.owner_id,
        }),
        "speedtest" => Ok(Command::Speedtest),
        "mediainfo" => Ok(Command::Mediainfo {
            task_ref: msg.rest.trim().to_string(),
        }),
        "exec" => Ok(Command::Exec {
            script: msg.rest.trim().to_string(),
        }),
        other => Err(DispatchError::UnknownVerb(other.to_string()).into()),
    }
}

fn parse_task(kind: TaskKind, msg: &IncomingMessage<'_>) -> Result<TaskConfig> {
    let tokens: Vec<&str> = msg.rest.split_whitespace().collect();
    let mut flags: HashMap<String, String> = HashMap::new();
    let mut bool_flags: std::collections::HashSet<String> = std::collections::HashSet::new();
    let mut bulk_range = None;
    let mut link = None;

    let mut i = 0;
    while i < tokens.len() {
        let token = tokens[i];
        if let Some(stripped) = token.strip_prefix("-b") {
            bulk_range = Some(parse_bulk_range(stripped));
            bool_flags.insert("-b".to_string());
            i += 1;
            continue;
        }
        if let Some(stripped) = token.strip_prefix("-d") {
            if stripped.is_empty() || stripped.starts_with(':') {
                flags.insert("-d".to_string(), stripped.to_string());
                i += 1;
                continue;
            }
        }
        if token.starts_with('-') {
            if !KNOWN_FLAGS.contains(&token) {
                return Err(DispatchError::UnknownFlag(token.to_string()).into());
            }
            if BOOLEAN_FLAGS.contains(&token) {
                bool_flags.insert(token.to_string());
                i += 1;
            } else {
                let value = tokens
                    .get(i + 1)
                    .ok_or_else(|| DispatchError::MissingFlagArgument(token.to_string()))?;
                flags.insert(token.to_string(), value.to_string());
                i += 2;
            }
        } else if i == 0 {
            link = Some(token.to_string());
            i += 1;
        } else {
            i += 1;
        }
    }

    let link = match link {
        Some(l) => l,
        None if msg.reply_is_media => format!("reply:{}", msg.reply_id.unwrap_or_default()),
        None => return Err(DispatchError::MissingLink.into()),
    };

    let http_auth = match (flags.get("-au"), flags.get("-ap")) {
        (Some(u), Some(p)) => Some((u.clone(), p.clone())),
        _ => None,
    };

    Ok(TaskConfig {
        id: TaskId::generate(),
        kind,
        owner_id: msg.owner_id,
        chat_id: msg.chat_id,
        reply_id: msg.reply_id,
        link,
        tag: None,
        name_override: flags.get("-n").cloned(),
        up_dest: flags.get("-up").cloned(),
        rclone_flags: flags.get("-rcf").cloned(),
        consume_next: flags.get("-i").and_then(|v| v.parse().ok()).unwrap_or(0),
        bulk_range,
        same_dir_key: flags.get("-m").cloned(),
        seed: flags.contains_key("-d"),
        seed_ratio_time: flags.get("-d").filter(|v| !v.is_empty()).cloned(),
        select: bool_flags.contains("-s"),
        compress: bool_flags.contains("-z"),
        extract: bool_flags.contains("-e"),
        extract_password: None,
        sample_video: bool_flags.contains("-sv"),
        screenshots: bool_flags.contains("-ss"),
        convert_audio_ext: flags.get("-ca").cloned(),
        convert_video_ext: flags.get("-cv").cloned(),
        metadata_title: flags.get("-md").cloned(),
        hybrid_leech: bool_flags.contains("-hl"),
        force_user_transmission: bool_flags.contains("-ut"),
        force_bot_transmission: bool_flags.contains("-bt"),
        force_document: bool_flags.contains("-doc"),
        force_media: bool_flags.contains("-med"),
        thumbnail_layout: flags.get("-tl").cloned(),
        split_size_override: flags.get("-sp").and_then(|v| v.parse().ok()),
        thumbnail_source: flags.get("-t").cloned(),
        name_substitution: flags.get("-ns").cloned(),
        http_auth,
        http_headers: flags.get("-h").cloned(),
        included_extensions: Vec::new(),
        excluded_extensions: Vec::new(),
        file_collision: FileCollisionAction::default(),
        watermark_position: WatermarkPosition::BottomRight,
    })
}

/// Parse the `:a:b` suffix of `-b[:a:b]` into an optional (start, end) pair.
fn parse_bulk_range(suffix: &str) -> (Option<u32>, Option<u32>) {
    let parts: Vec<&str> = suffix.trim_start_matches(':').split(':').collect();
    match parts.as_slice() {
        [a, b] if !a.is_empty() && !b.is_empty() => (a.parse().ok(), b.parse().ok()),
        [a] if !a.is_empty() => (a.parse().ok(), None),
        _ => (None, None),
    }
}

/// Resolve a `-t <msg-ref>` thumbnail source against the user's saved
/// default, mirroring the fallback the dispatcher applies when no explicit
/// override is present on the command line.
pub fn resolve_thumbnail(explicit: Option<&str>, user_default: Option<&PathBuf>) -> Option<String> {
    explicit
        .map(str::to_string)
        .or_else(|| user_default.map(|p| p.display().to_string()))
}

#[allow(clippy::unwrap_used)]
#[cfg(test)]
mod tests {
    use super::*;

    fn msg<'a>(verb: &'a str, rest: &'a str) -> IncomingMessage<'a> {
        IncomingMessage {
            verb,
            rest,
            owner_id: 1,
            chat_id: 100,
            reply_id: None,
            reply_is_media: false,
        }
    }

    #[test]
    fn first_token_is_the_link() {
        let m = msg("mirror", "https://example.com/file.zip -z");
        let Command::NewTask(cfg) = dispatch(&m).unwrap() else {
            panic!("expected NewTask");
        };
        assert_eq!(cfg.link, "https://example.com/file.zip");
        assert!(cfg.compress);
    }

    #[test]
    fn missing_link_without_media_reply_is_rejected() {
        let m = msg("leech", "-z");
        assert!(dispatch(&m).is_err());
    }

    #[test]
    fn media_reply_supplies_the_link_when_absent() {
        let mut m = msg("leech", "-z");
        m.reply_is_media = true;
        m.reply_id = Some(42);
        let Command::NewTask(cfg) = dispatch(&m).unwrap() else {
            panic!("expected NewTask");
        };
        assert_eq!(cfg.link, "reply:42");
    }

    #[test]
    fn valued_flags_without_an_argument_are_rejected() {
        let m = msg("mirror", "https://example.com -up");
        assert!(dispatch(&m).is_err());
    }

    #[test]
    fn unknown_flag_is_rejected() {
        let m = msg("mirror", "https://example.com -zz");
        assert!(dispatch(&m).is_err());
    }

    #[test]
    fn bulk_range_is_parsed_from_the_combined_token() {
        let m = msg("mirror", "https://example.com -b:2:5");
        let Command::NewTask(cfg) = dispatch(&m).unwrap() else {
            panic!("expected NewTask");
        };
        assert_eq!(cfg.bulk_range, Some((Some(2), Some(5))));
    }

    #[test]
    fn http_basic_auth_requires_both_flags() {
        let m = msg("mirror", "https://example.com -au user -ap pass");
        let Command::NewTask(cfg) = dispatch(&m).unwrap() else {
            panic!("expected NewTask");
        };
        assert_eq!(cfg.http_auth, Some(("user".to_string(), "pass".to_string())));
    }

    #[test]
    fn merge_with_no_rest_starts_a_session() {
        let m = msg("merge", "");
        assert!(matches!(dispatch(&m).unwrap(), Command::MergeStart { .. }));
    }

    #[test]
    fn merge_with_rest_adds_an_input() {
        let m = msg("merge", "https://example.com/a.mkv");
        assert!(matches!(dispatch(&m).unwrap(), Command::MergeAdd { .. }));
    }

    #[test]
    fn unknown_verb_is_rejected() {
        let m = msg("not-a-verb", "");
        assert!(dispatch(&m).is_err());
    }

    #[test]
    fn seed_flag_without_colon_suffix_has_no_ratio_time() {
        let m = msg("mirror", "magnet:?xt=urn -d");
        let Command::NewTask(cfg) = dispatch(&m).unwrap() else {
            panic!("expected NewTask");
        };
        assert!(cfg.seed);
        assert_eq!(cfg.seed_ratio_time, None);
    }
}
