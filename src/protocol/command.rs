//! Command parsing for the per-connection dispatcher
//!
//! Every frame after authentication is either a control word, a system
//! command (`@@` prefix), a private message (`@user：text`), a group message
//! (`#group：text`), or a plain broadcast. The private/group separator is
//! the full-width colon `：`, matching the client protocol.

/// Target kind of a file upload announce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileScope {
    Group,
    Private,
}

/// One decoded client frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// `##exit` — clean disconnect
    Exit,
    /// `@@quit` — disconnect with server acknowledgement
    Quit,
    /// `@@list`
    ListOnline,
    /// `@@allusers`
    ListAllUsers,
    /// `@@anonymous`
    ToggleAnonymous,
    /// `@@create <id> <name>`
    CreateGroup { id: String, name: String },
    /// `@@join <id>`
    JoinGroup { id: String },
    /// `@@leave <id>`
    LeaveGroup { id: String },
    /// `@@groups`
    ListGroups,
    /// `@@voice|<user>` — opaque signaling, relayed verbatim
    Voice { target: String },
    /// `@@voiceend|<user>`
    VoiceEnd { target: String },
    /// `@@groupvoice|<id>`
    GroupVoice { group: String },
    /// `@@groupvoiceend|<id>`
    GroupVoiceEnd { group: String },
    /// `@@file|<group|private>|<target>|<name>` — length + bytes follow
    FileUpload {
        scope: FileScope,
        target: String,
        name: String,
    },
    /// `@@download|<name>`
    Download { name: String },
    /// `@<user>：<text>`
    Private { to: String, text: String },
    /// `#<group>：<text>`
    Group { group: String, text: String },
    /// Any other frame body
    Broadcast(String),
    /// Recognized prefix with a malformed remainder
    Invalid { reason: String },
}

impl Command {
    /// Decode one frame body. Never fails: unrecognized text is a broadcast,
    /// and a malformed system command becomes `Invalid` so the dispatcher
    /// can reply with an error to the sender only.
    pub fn parse(frame: &str) -> Command {
        match frame {
            "##exit" => return Command::Exit,
            "@@quit" => return Command::Quit,
            "@@list" => return Command::ListOnline,
            "@@allusers" => return Command::ListAllUsers,
            "@@anonymous" => return Command::ToggleAnonymous,
            "@@groups" => return Command::ListGroups,
            _ => {}
        }

        if let Some(rest) = frame.strip_prefix("@@file|") {
            return parse_file_upload(rest);
        }
        if let Some(rest) = frame.strip_prefix("@@download|") {
            if rest.is_empty() {
                return invalid("download command is missing a file name");
            }
            return Command::Download {
                name: rest.to_string(),
            };
        }
        if let Some(rest) = frame.strip_prefix("@@create") {
            return parse_create(rest);
        }
        if let Some(rest) = frame.strip_prefix("@@join") {
            return match single_arg(rest) {
                Some(id) => Command::JoinGroup { id },
                None => invalid("usage: @@join <group-id>"),
            };
        }
        if let Some(rest) = frame.strip_prefix("@@leave") {
            return match single_arg(rest) {
                Some(id) => Command::LeaveGroup { id },
                None => invalid("usage: @@leave <group-id>"),
            };
        }
        // The longer prefixes must be tried first.
        if let Some(rest) = frame.strip_prefix("@@groupvoiceend|") {
            return routed(rest, |group| Command::GroupVoiceEnd { group });
        }
        if let Some(rest) = frame.strip_prefix("@@groupvoice|") {
            return routed(rest, |group| Command::GroupVoice { group });
        }
        if let Some(rest) = frame.strip_prefix("@@voiceend|") {
            return routed(rest, |target| Command::VoiceEnd { target });
        }
        if let Some(rest) = frame.strip_prefix("@@voice|") {
            return routed(rest, |target| Command::Voice { target });
        }

        if let Some(rest) = frame.strip_prefix('@') {
            return match rest.split_once('：') {
                Some((to, text)) if !to.is_empty() => Command::Private {
                    to: to.to_string(),
                    text: text.to_string(),
                },
                _ => invalid("usage: @<user>：<text>"),
            };
        }
        if let Some(rest) = frame.strip_prefix('#') {
            return match rest.split_once('：') {
                Some((group, text)) if !group.is_empty() => Command::Group {
                    group: group.to_string(),
                    text: text.to_string(),
                },
                _ => invalid("usage: #<group>：<text>"),
            };
        }

        Command::Broadcast(frame.to_string())
    }
}

fn invalid(reason: &str) -> Command {
    Command::Invalid {
        reason: reason.to_string(),
    }
}

fn routed(rest: &str, build: impl FnOnce(String) -> Command) -> Command {
    if rest.is_empty() {
        invalid("signaling command is missing a target")
    } else {
        build(rest.to_string())
    }
}

/// `@@create <id> <name>` — the name may contain spaces.
fn parse_create(rest: &str) -> Command {
    let mut parts = rest.trim_start().splitn(2, ' ');
    match (parts.next(), parts.next()) {
        (Some(id), Some(name)) if !id.is_empty() && !name.trim().is_empty() => {
            Command::CreateGroup {
                id: id.to_string(),
                name: name.trim().to_string(),
            }
        }
        _ => invalid("usage: @@create <group-id> <group-name>"),
    }
}

fn single_arg(rest: &str) -> Option<String> {
    let mut parts = rest.trim().split_whitespace();
    match (parts.next(), parts.next()) {
        (Some(arg), None) => Some(arg.to_string()),
        _ => None,
    }
}

fn parse_file_upload(rest: &str) -> Command {
    let parts: Vec<&str> = rest.split('|').collect();
    if parts.len() != 3 {
        return invalid("usage: @@file|<group|private>|<target>|<name>");
    }
    let scope = match parts[0] {
        "group" => FileScope::Group,
        "private" => FileScope::Private,
        other => {
            return invalid(&format!("unknown file target kind: {}", other));
        }
    };
    if parts[1].is_empty() || parts[2].is_empty() {
        return invalid("file command is missing a target or file name");
    }
    Command::FileUpload {
        scope,
        target: parts[1].to_string(),
        name: parts[2].to_string(),
    }
}
