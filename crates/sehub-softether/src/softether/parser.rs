//! Parser for `vpncmd` listing output.
//!
//! `vpncmd` prints the same logical listing in one of two shapes:
//!
//! ```text
//! Item            |Value                       (vertical)
//! ----------------+----------
//! User Name       |alice
//! Group Name      |-
//! Last Login      |2024-01-05 10:11:12
//! ----------------+----------
//! User Name       |bob
//!
//! alice|staff                                  (tabular)
//! bob|-
//! ```
//!
//! Vertical blocks start a record at a designated field; tabular rows are
//! mapped positionally onto a fixed column layout. Both shapes may appear
//! in the same output. All knowledge of the text format lives here.

use crate::softether::types::*;
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use lazy_static::lazy_static;
use log::warn;
use regex::Regex;
use std::collections::{BTreeMap, HashSet};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Layouts
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Field knowledge for one listing command.
#[derive(Debug, Clone, Copy)]
pub struct RecordLayout {
    /// Field that opens a new vertical record.
    pub start: &'static str,
    /// Every key that may appear in vertical form.
    pub keys: &'static [&'static str],
    /// Column order for tabular rows.
    pub columns: &'static [&'static str],
}

impl RecordLayout {
    fn is_key(&self, key: &str) -> bool {
        self.keys.iter().any(|k| k.eq_ignore_ascii_case(key))
    }

    /// Column header rows repeat the layout's own column names.
    fn is_header(&self, cols: &[&str]) -> bool {
        let first = cols.first().copied().unwrap_or_default();
        first.eq_ignore_ascii_case("Item")
            || (first.eq_ignore_ascii_case(self.columns[0])
                && cols.get(1).map(|c| self.is_key(c)).unwrap_or(false))
    }
}

pub const USER_LAYOUT: RecordLayout = RecordLayout {
    start: "User Name",
    keys: &[
        "User Name",
        "Full Name",
        "Group Name",
        "Description",
        "Auth Method",
        "Num Logins",
        "Number of Logins",
        "Last Login",
        "Expiration Date",
        "Transfer Bytes",
        "Transfer Packets",
    ],
    columns: &["User Name", "Group Name"],
};

pub const SESSION_LAYOUT: RecordLayout = RecordLayout {
    start: "Session Name",
    keys: &[
        "Session Name",
        "VLAN ID",
        "Location",
        "User Name",
        "Source Host Name",
        "Client IP Address",
        "Connection Started at",
        "TCP Connections",
        "Transfer Bytes",
        "Transfer Packets",
    ],
    columns: &[
        "Session Name",
        "VLAN ID",
        "Location",
        "User Name",
        "Source Host Name",
        "TCP Connections",
        "Transfer Bytes",
        "Transfer Packets",
    ],
};

pub const ACCESS_LAYOUT: RecordLayout = RecordLayout {
    start: "ID",
    keys: &[
        "ID",
        "Action",
        "Status",
        "Priority",
        "Memo",
        "Contents",
        "Source User Name",
        "Destination User Name",
    ],
    columns: &["ID", "Action", "Status", "Priority", "Memo", "Contents"],
};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Raw records
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One record as key/value text, in output order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawRecord {
    entries: Vec<(String, String)>,
}

impl RawRecord {
    fn push(&mut self, key: &str, value: &str) {
        self.entries.push((key.to_string(), value.to_string()));
    }

    /// Value for `key`, or `None` when missing or a placeholder.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .and_then(|(_, v)| present(v))
    }

    /// First present value among several aliases.
    pub fn get_any(&self, keys: &[&str]) -> Option<&str> {
        keys.iter().find_map(|k| self.get(k))
    }

    pub fn values(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(_, v)| v.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Treat empty cells, dashes, and `(None)`-style placeholders as absent.
fn present(value: &str) -> Option<&str> {
    let v = value.trim();
    let lower = v.to_ascii_lowercase();
    if v.is_empty() || v.chars().all(|c| c == '-') || lower == "none" || lower == "(none)" {
        None
    } else {
        Some(v)
    }
}

fn is_separator(line: &str) -> bool {
    let t = line.trim();
    !t.is_empty() && t.chars().all(|c| matches!(c, '-' | '+' | '=' | '|' | ' '))
}

/// Split `vpncmd` output into records according to `layout`.
///
/// A vertical record runs from its start field to the next separator,
/// pipe-less line, or start field. Inside one, every line is `key|value`
/// (the value may itself contain `|`) and unknown keys are skipped.
/// Tabular rows are only recognised outside a vertical record and must
/// carry exactly the layout's column count.
pub fn parse_records(raw: &str, layout: &RecordLayout) -> Vec<RawRecord> {
    let mut records = Vec::new();
    let mut current: Option<RawRecord> = None;

    for line in raw.lines() {
        if !line.contains('|') || is_separator(line) {
            if let Some(done) = current.take() {
                records.push(done);
            }
            continue;
        }
        let cols: Vec<&str> = line.split('|').map(str::trim).collect();
        if layout.is_header(&cols) {
            continue;
        }

        let (key, value) = match line.split_once('|') {
            Some((k, v)) => (k.trim(), v.trim()),
            None => continue,
        };

        if key.eq_ignore_ascii_case(layout.start) {
            if let Some(done) = current.take() {
                records.push(done);
            }
            let mut rec = RawRecord::default();
            rec.push(layout.start, value);
            current = Some(rec);
            continue;
        }

        if let Some(rec) = current.as_mut() {
            if layout.is_key(key) {
                rec.push(key, value);
            } else {
                warn!("Ignoring unrecognized '{}' field in a {} record", key, layout.start);
            }
            continue;
        }

        if layout.is_key(key) {
            warn!("Ignoring '{}' field outside of a {} record", key, layout.start);
        } else if cols.len() == layout.columns.len() {
            let mut rec = RawRecord::default();
            for (column, value) in layout.columns.iter().zip(cols.iter()) {
                rec.push(column, value);
            }
            records.push(rec);
        } else {
            warn!(
                "Ignoring {}-column line in a {}-column {} listing",
                cols.len(),
                layout.columns.len(),
                layout.start
            );
        }
    }

    if let Some(done) = current.take() {
        records.push(done);
    }
    records
}

/// Collect every `key | value` pair of a single-object listing.
pub fn parse_key_values(raw: &str) -> BTreeMap<String, String> {
    let mut map = BTreeMap::new();
    for line in raw.lines() {
        if is_separator(line) {
            continue;
        }
        let Some((key, value)) = line.split_once('|') else {
            continue;
        };
        let key = key.trim();
        if key.is_empty() || key.eq_ignore_ascii_case("Item") {
            continue;
        }
        map.entry(key.to_string())
            .or_insert_with(|| value.trim().to_string());
    }
    map
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Scalars
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

lazy_static! {
    // An optional weekday like "(Fri)" sits between date and time on some builds.
    static ref TIMESTAMP_RE: Option<Regex> = Regex::new(
        r"^(\d{4})-(\d{2})-(\d{2})\s+(?:\([A-Za-z]{3}\)\s+)?(\d{2}):(\d{2}):(\d{2})$"
    )
    .ok();
    static ref SRC_USER_RE: Option<Regex> =
        Regex::new(r"(?i)src\s*user(?:\s*name)?\s*[=:]\s*([^,;\s]+)").ok();
    static ref DST_USER_RE: Option<Regex> =
        Regex::new(r"(?i)dst\s*user(?:\s*name)?\s*[=:]\s*([^,;\s]+)").ok();
}

/// Parse `YYYY-MM-DD HH:MM:SS` as UTC; anything else is absent.
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    let caps = TIMESTAMP_RE.as_ref()?.captures(present(value)?)?;
    let num = |i: usize| caps.get(i).and_then(|m| m.as_str().parse::<u32>().ok());

    let date = NaiveDate::from_ymd_opt(num(1)? as i32, num(2)?, num(3)?)?;
    let naive = date.and_hms_opt(num(4)?, num(5)?, num(6)?)?;
    Some(Utc.from_utc_datetime(&naive))
}

/// Parse counters printed with thousands separators.
pub fn parse_count(value: &str) -> Option<u64> {
    present(value)?.replace(',', "").parse().ok()
}

fn capture_user(re: &Option<Regex>, text: &str) -> Option<String> {
    let caps = re.as_ref()?.captures(text)?;
    Some(caps.get(1)?.as_str().to_string())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Typed records
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Parse `UserList` output. Duplicate names keep the first occurrence.
pub fn parse_accounts(raw: &str) -> Vec<Account> {
    let mut seen = HashSet::new();
    let mut accounts = Vec::new();

    for rec in parse_records(raw, &USER_LAYOUT) {
        let Some(name) = rec.get("User Name") else {
            warn!("Dropping user record without a name");
            continue;
        };
        if !seen.insert(name.to_lowercase()) {
            continue;
        }
        accounts.push(Account {
            name: name.to_string(),
            group: rec.get("Group Name").map(str::to_string),
            full_name: rec.get("Full Name").map(str::to_string),
            auth_method: rec.get("Auth Method").map(str::to_string),
            num_logins: rec.get_any(&["Num Logins", "Number of Logins"]).and_then(parse_count),
            last_login: rec.get("Last Login").and_then(parse_timestamp),
            online: false,
        });
    }
    accounts
}

/// Parse `SessionList` output.
pub fn parse_sessions(raw: &str) -> Vec<Session> {
    parse_records(raw, &SESSION_LAYOUT)
        .into_iter()
        .filter_map(|rec| {
            let Some(name) = rec.get("Session Name") else {
                warn!("Dropping session record without a session name");
                return None;
            };
            Some(Session {
                name: name.to_string(),
                account: rec.get("User Name").map(str::to_string),
                client_address: rec
                    .get_any(&["Client IP Address", "Source Host Name"])
                    .map(str::to_string),
                connected_at: rec.get("Connection Started at").and_then(parse_timestamp),
                location: rec.get("Location").map(str::to_string),
            })
        })
        .collect()
}

/// Parse `AccessList` output.
pub fn parse_access_rules(raw: &str) -> Vec<AccessRule> {
    parse_records(raw, &ACCESS_LAYOUT)
        .into_iter()
        .filter_map(|rec| {
            let id = match rec.get("ID").map(|v| v.parse::<u32>()) {
                Some(Ok(id)) => id,
                _ => {
                    warn!("Dropping access rule with a missing or non-numeric id");
                    return None;
                }
            };
            let contents = rec.get("Contents").unwrap_or_default();
            let priority = rec.get("Priority").and_then(|p| p.parse().ok());
            if priority.is_none() && rec.get("Priority").is_some() {
                warn!("Access rule {} has an unreadable priority", id);
            }
            Some(AccessRule {
                id,
                priority,
                action: rec.get("Action").and_then(RuleAction::from_cli),
                source: rec
                    .get("Source User Name")
                    .map(str::to_string)
                    .or_else(|| capture_user(&SRC_USER_RE, contents)),
                destination: rec
                    .get("Destination User Name")
                    .map(str::to_string)
                    .or_else(|| capture_user(&DST_USER_RE, contents)),
                memo: rec.get("Memo").map(str::to_string),
                fields: rec.values().map(str::to_string).collect(),
            })
        })
        .collect()
}

/// Parse `UserGet` output into a detail record.
pub fn parse_account_detail(name: &str, raw: &str) -> Result<AccountDetail, SoftEtherError> {
    let fields = parse_key_values(raw);
    if fields.is_empty() {
        return Err(SoftEtherError::parse(format!(
            "UserGet output for '{}' contained no fields",
            name
        )));
    }

    let get = |keys: &[&str]| -> Option<String> {
        keys.iter().find_map(|k| {
            fields
                .iter()
                .find(|(fk, _)| fk.eq_ignore_ascii_case(k))
                .and_then(|(_, v)| present(v))
                .map(str::to_string)
        })
    };
    let stamp = |keys: &[&str]| get(keys).as_deref().and_then(parse_timestamp);

    Ok(AccountDetail {
        name: get(&["User Name"]).unwrap_or_else(|| name.to_string()),
        group: get(&["Group Name"]),
        full_name: get(&["Full Name"]),
        description: get(&["Description", "Note"]),
        auth_method: get(&["Auth Type", "Auth Method"]),
        num_logins: get(&["Number of Logins", "Num Logins"]).as_deref().and_then(parse_count),
        last_login: stamp(&["Last Login", "Last Login Time"]),
        created_at: stamp(&["Created on", "Created"]),
        updated_at: stamp(&["Updated on", "Updated"]),
        expires_at: stamp(&["Expiration Date"]),
        fields: fields.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike};

    const USERS_VERTICAL: &str = "\
vpncmd command - SoftEther VPN Command Line Management Utility
UserList command - Get List of Users
Item             |Value
-----------------+-----------------------
User Name        |alice
Full Name        |Alice A.
Group Name       |-
Description      |
Auth Method      |Password Authentication
Num Logins       |1,204
Last Login       |2024-01-05 10:11:12
-----------------+-----------------------
User Name        |bob
Group Name       |staff
Last Login       |(None)
The command completed successfully.
";

    const USERS_TABULAR: &str = "\
User Name|Group Name
---------+----------
alice|staff
bob|-
carol
";

    // ── Vertical ────────────────────────────────────────────────────

    #[test]
    fn vertical_one_record_per_boundary() {
        let recs = parse_records(USERS_VERTICAL, &USER_LAYOUT);
        assert_eq!(recs.len(), 2);
        assert_eq!(recs[0].get("User Name"), Some("alice"));
        assert_eq!(recs[1].get("User Name"), Some("bob"));
    }

    #[test]
    fn vertical_absent_fields_are_none() {
        let accounts = parse_accounts(USERS_VERTICAL);
        let alice = &accounts[0];
        assert_eq!(alice.group, None);
        assert_eq!(alice.full_name.as_deref(), Some("Alice A."));
        assert_eq!(alice.num_logins, Some(1204));
        let ts = alice.last_login.unwrap();
        assert_eq!((ts.year(), ts.month(), ts.day()), (2024, 1, 5));
        assert_eq!((ts.hour(), ts.minute(), ts.second()), (10, 11, 12));

        let bob = &accounts[1];
        assert_eq!(bob.group.as_deref(), Some("staff"));
        assert_eq!(bob.last_login, None);
        assert_eq!(bob.num_logins, None);
        assert!(!bob.online);
    }

    #[test]
    fn orphan_fields_before_first_record_are_ignored() {
        let raw = "Group Name|staff\nUser Name|dave\nGroup Name|ops\n";
        let accounts = parse_accounts(raw);
        assert_eq!(accounts.len(), 1);
        assert_eq!(accounts[0].group.as_deref(), Some("ops"));
    }

    // ── Tabular ─────────────────────────────────────────────────────

    #[test]
    fn tabular_rows_map_positionally() {
        let accounts = parse_accounts(USERS_TABULAR);
        // "carol" has no pipe and is not a row.
        assert_eq!(accounts.len(), 2);
        assert_eq!(accounts[0].name, "alice");
        assert_eq!(accounts[0].group.as_deref(), Some("staff"));
        assert_eq!(accounts[1].name, "bob");
        assert_eq!(accounts[1].group, None);
    }

    #[test]
    fn mixed_shapes_and_duplicates() {
        let raw = format!("{}\nalice|staff\nerin|ops\n", USERS_VERTICAL);
        let names: Vec<String> = parse_accounts(&raw).into_iter().map(|a| a.name).collect();
        assert_eq!(names, vec!["alice", "bob", "erin"]);
    }

    #[test]
    fn sessions_in_both_shapes() {
        let vertical = "\
Item              |Value
------------------+---------------------
Session Name      |SID-ALICE-[OPENVPN_L3]-3
VLAN ID           |-
Location          |Local Session
User Name         |alice
Source Host Name  |203.0.113.5
Transfer Bytes    |13,541
------------------+---------------------
Session Name      |SID-SECURENAT-1
User Name         |SecureNAT
";
        let tabular = "SID-BOB-7|-|Local Session|bob|198.51.100.2|1|100|3\n";

        let sessions = parse_sessions(vertical);
        assert_eq!(sessions.len(), 2);
        assert_eq!(sessions[0].account.as_deref(), Some("alice"));
        assert_eq!(sessions[0].client_address.as_deref(), Some("203.0.113.5"));
        assert_eq!(sessions[0].connected_at, None);
        assert!(sessions[1].is_securenat());

        let sessions = parse_sessions(tabular);
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].name, "SID-BOB-7");
        assert_eq!(sessions[0].account.as_deref(), Some("bob"));
        assert_eq!(sessions[0].location.as_deref(), Some("Local Session"));
    }

    // ── Unrecognized lines ──────────────────────────────────────────

    #[test]
    fn unknown_key_inside_vertical_block_is_skipped() {
        let raw = "User Name|bob\nSecurity Policy|x\nGroup Name|ops\n";
        let accounts = parse_accounts(raw);
        assert_eq!(accounts.len(), 1);
        assert_eq!(accounts[0].name, "bob");
        assert_eq!(accounts[0].group.as_deref(), Some("ops"));
    }

    #[test]
    fn vertical_value_may_contain_pipes() {
        let raw = "User Name|carol\nDescription|lab | night shift\nGroup Name|ops\n";
        let recs = parse_records(raw, &USER_LAYOUT);
        assert_eq!(recs.len(), 1);
        assert_eq!(recs[0].get("Description"), Some("lab | night shift"));
        assert_eq!(recs[0].get("Group Name"), Some("ops"));
    }

    #[test]
    fn real_session_block_yields_one_session_per_name() {
        let raw = "\
Item              |Value
------------------+---------------------
Session Name      |SID-ALICE-3
VLAN ID           |-
Location          |Local Session
User Name         |alice
Source Host Name  |203.0.113.5
TCP Connections   |2
Client Build      |9798
Transfer Bytes    |13,541
------------------+---------------------
Session Name      |SID-BOB-4
User Name         |bob
The command completed successfully.
";
        let sessions = parse_sessions(raw);
        let names: Vec<&str> = sessions.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["SID-ALICE-3", "SID-BOB-4"]);
        assert_eq!(sessions[0].account.as_deref(), Some("alice"));
        assert_eq!(sessions[1].account.as_deref(), Some("bob"));
    }

    #[test]
    fn short_lines_outside_a_record_are_not_rows() {
        // Two columns never make a seven-or-more-column session row.
        let raw = "Client Build|9798\nSID-EVE-1|-|Local Session|eve|198.51.100.9|1|0|0\n";
        let sessions = parse_sessions(raw);
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].name, "SID-EVE-1");
    }

    // ── Access rules ────────────────────────────────────────────────

    #[test]
    fn access_rules_vertical() {
        let raw = "\
Item     |Value
---------+------
ID       |1
Action   |Pass
Status   |Enabled
Priority |10
Memo     |alice_to_alice-mt
Contents |(ipv4) SrcUsername=alice, DstUsername=alice-mt
---------+------
ID       |2
Action   |Discard
Priority |20
Memo     |drop_alice
Contents |(ipv4) SrcUsername=alice
---------+------
ID       |x
Action   |Pass
";
        let rules = parse_access_rules(raw);
        assert_eq!(rules.len(), 2);
        assert_eq!(rules[0].id, 1);
        assert_eq!(rules[0].priority, Some(10));
        assert_eq!(rules[0].action, Some(RuleAction::Allow));
        assert_eq!(rules[0].source.as_deref(), Some("alice"));
        assert_eq!(rules[0].destination.as_deref(), Some("alice-mt"));
        assert_eq!(rules[1].action, Some(RuleAction::Deny));
        assert_eq!(rules[1].destination, None);
        assert!(rules[1].mentions("ALICE"));
    }

    #[test]
    fn access_rules_tabular() {
        let raw = "\
ID|Action|Status|Priority|Memo|Contents
--+------+------+--------+----+--------
5|Pass|Enabled|10|bob_to_bob-mt|(ipv4) SrcUsername=bob, DstUsername=bob-mt
";
        let rules = parse_access_rules(raw);
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].id, 5);
        assert_eq!(rules[0].memo.as_deref(), Some("bob_to_bob-mt"));
        assert_eq!(rules[0].destination.as_deref(), Some("bob-mt"));
    }

    // ── Detail ──────────────────────────────────────────────────────

    #[test]
    fn account_detail_fields() {
        let raw = "\
Item             |Value
-----------------+--------------------
User Name        |alice
Group Name       |staff
Created on       |2023-12-01 08:00:00
Expiration Date  |No Expiration
Number of Logins |3
Last Login       |2024-01-05 (Fri) 10:11:12
";
        let d = parse_account_detail("alice", raw).unwrap();
        assert_eq!(d.name, "alice");
        assert_eq!(d.group.as_deref(), Some("staff"));
        assert_eq!(d.num_logins, Some(3));
        assert!(d.created_at.is_some());
        assert!(d.last_login.is_some());
        assert_eq!(d.expires_at, None);
        assert_eq!(d.fields.get("Expiration Date").map(String::as_str), Some("No Expiration"));
    }

    #[test]
    fn account_detail_empty_output_is_parse_error() {
        let err = parse_account_detail("ghost", "The command completed successfully.\n").unwrap_err();
        assert_eq!(err.kind, SoftEtherErrorKind::Parse);
    }

    // ── Timestamps ──────────────────────────────────────────────────

    #[test]
    fn timestamp_placeholders_are_absent() {
        assert!(parse_timestamp("2024-02-29 23:59:59").is_some());
        assert_eq!(parse_timestamp("-"), None);
        assert_eq!(parse_timestamp("none"), None);
        assert_eq!(parse_timestamp("(None)"), None);
        assert_eq!(parse_timestamp("2024/01/05 10:11:12"), None);
        assert_eq!(parse_timestamp("2023-02-30 00:00:00"), None);
        assert_eq!(parse_timestamp(""), None);
    }

    #[test]
    fn separator_lines() {
        assert!(is_separator("-----+-----"));
        assert!(is_separator("  ---  "));
        assert!(!is_separator("a|b"));
        assert!(!is_separator(""));
    }
}
