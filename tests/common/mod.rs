//! Stateful stand-in for `vpncmd` shared by the integration tests.
#![allow(dead_code)]

use async_trait::async_trait;
use sehub_lib::api::HubApi;
use sehub_lib::config::AppConfig;
use sehub_reconcile::reconcile::ManualClock;
use sehub_softether::softether::{CommandOutput, CommandRunner, Invocation, RetryPolicy, SoftEtherError};
use std::collections::HashSet;
use std::path::Path;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

const OK: &str = "The command completed successfully.";

#[derive(Debug, Clone)]
pub struct FakeRule {
    pub id: u32,
    pub pass: bool,
    pub priority: u32,
    pub memo: String,
    pub src: String,
    pub dst: String,
}

#[derive(Default)]
pub struct FakeHub {
    pub accounts: Mutex<Vec<String>>,
    pub online: Mutex<Vec<String>>,
    pub rules: Mutex<Vec<FakeRule>>,
    pub fail_delete: Mutex<HashSet<String>>,
    pub log: Mutex<Vec<String>>,
    /// Calls to answer with a "busy" failure before behaving normally.
    pub busy_remaining: AtomicU32,
    /// Simulated execution time of every call.
    pub latency_ms: AtomicU32,
    next_rule: AtomicU32,
    active: AtomicUsize,
    pub max_active: AtomicUsize,
}

fn failure(code: u32) -> CommandOutput {
    CommandOutput::failure(1, format!("Error occurred. (Error code: {})", code), "")
}

pub fn session_name(user: &str) -> String {
    format!("SID-{}-1", user.to_uppercase())
}

impl FakeHub {
    pub fn with(accounts: &[&str], online: &[&str]) -> Arc<Self> {
        let hub = Self::default();
        *hub.accounts.lock().unwrap() = accounts.iter().map(|s| s.to_string()).collect();
        *hub.online.lock().unwrap() = online.iter().map(|s| s.to_string()).collect();
        Arc::new(hub)
    }

    pub fn commands(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    pub fn account_names(&self) -> Vec<String> {
        self.accounts.lock().unwrap().clone()
    }

    fn user_list(&self) -> String {
        let mut out = String::from("Item|Value\n----+-----\n");
        for name in self.accounts.lock().unwrap().iter() {
            out.push_str(&format!("User Name|{}\nGroup Name|-\nNum Logins|3\n", name));
        }
        out.push_str(OK);
        out
    }

    fn session_list(&self) -> String {
        let mut out = String::from("Session Name|SID-SECURENAT-1\nUser Name|SecureNAT\n");
        for (i, user) in self.online.lock().unwrap().iter().enumerate() {
            out.push_str(&format!(
                "Session Name|{}\nUser Name|{}\nSource Host Name|10.0.0.{}\n",
                session_name(user),
                user,
                i + 10
            ));
        }
        out
    }

    fn access_list(&self) -> String {
        let mut out = String::from("ID|Action|Status|Priority|Memo|Contents\n--+------+------+--------+----+--------\n");
        for r in self.rules.lock().unwrap().iter() {
            let contents = if r.dst.is_empty() {
                format!("(ipv4) SrcUsername={}", r.src)
            } else {
                format!("(ipv4) SrcUsername={}, DstUsername={}", r.src, r.dst)
            };
            out.push_str(&format!(
                "{}|{}|Enabled|{}|{}|{}\n",
                r.id,
                if r.pass { "Pass" } else { "Discard" },
                r.priority,
                r.memo,
                contents
            ));
        }
        out
    }

    fn answer(&self, invocation: &Invocation) -> CommandOutput {
        let (command, args): (&str, Vec<String>) = match invocation {
            Invocation::Command { command, args } => (command.as_str(), args.clone()),
            Invocation::Script(lines) => (
                lines.first().map(String::as_str).unwrap_or(""),
                lines.iter().skip(1).cloned().collect(),
            ),
        };
        let arg0 = args.first().cloned().unwrap_or_default();
        let exists = |name: &str| self.accounts.lock().unwrap().iter().any(|a| a == name);

        match command {
            "UserList" => CommandOutput::success(self.user_list()),
            "SessionList" => CommandOutput::success(self.session_list()),
            "AccessList" => CommandOutput::success(self.access_list()),
            "UserGet" if exists(&arg0) => CommandOutput::success(format!(
                "Item|Value\nUser Name|{}\nGroup Name|-\nAuth Type|Password Authentication\nNumber of Logins|3\nCreated on|2024-02-01 08:00:00\n",
                arg0
            )),
            "UserGet" | "UserPasswordSet" if !exists(&arg0) => failure(29),
            "UserCreate" if exists(&arg0) => failure(66),
            "UserCreate" => {
                self.accounts.lock().unwrap().push(arg0);
                CommandOutput::success(OK)
            }
            "UserDelete" if self.fail_delete.lock().unwrap().contains(&arg0) => failure(7),
            "UserDelete" if !exists(&arg0) => failure(29),
            "UserDelete" => {
                self.accounts.lock().unwrap().retain(|a| *a != arg0);
                CommandOutput::success(OK)
            }
            "SessionDisconnect" => {
                let mut online = self.online.lock().unwrap();
                let found = online.iter().position(|u| session_name(u) == arg0);
                match found {
                    Some(i) => {
                        online.remove(i);
                        CommandOutput::success(OK)
                    }
                    None => failure(29),
                }
            }
            "AccessAdd" => {
                let id = self.next_rule.fetch_add(1, Ordering::SeqCst) + 1;
                self.rules.lock().unwrap().push(FakeRule {
                    id,
                    memo: args.first().cloned().unwrap_or_default(),
                    priority: args.get(1).and_then(|p| p.parse().ok()).unwrap_or(0),
                    pass: args.get(2).map(|a| a == "Pass").unwrap_or(false),
                    src: args.get(3).cloned().unwrap_or_default(),
                    dst: args.get(4).cloned().unwrap_or_default(),
                });
                CommandOutput::success(OK)
            }
            "AccessDelete" => {
                let id: u32 = arg0.parse().unwrap_or(0);
                let mut rules = self.rules.lock().unwrap();
                let before = rules.len();
                rules.retain(|r| r.id != id);
                if rules.len() < before {
                    CommandOutput::success(OK)
                } else {
                    failure(29)
                }
            }
            _ => CommandOutput::success(OK),
        }
    }
}

#[async_trait]
impl CommandRunner for FakeHub {
    async fn run(&self, invocation: &Invocation) -> Result<CommandOutput, SoftEtherError> {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now, Ordering::SeqCst);
        self.log.lock().unwrap().push(invocation.redacted());

        let latency = self.latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(u64::from(latency))).await;
        }

        let busy = self
            .busy_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        let out = if busy {
            CommandOutput::failure(1, "Error occurred. The server is busy, try again later.", "")
        } else {
            self.answer(invocation)
        };

        self.active.fetch_sub(1, Ordering::SeqCst);
        Ok(out)
    }
}

/// Config rooted in `dir` with fast retries, no lock file, and no caching.
pub fn test_config(dir: &Path) -> AppConfig {
    let mut config = AppConfig::default();
    config.softether.retry = RetryPolicy {
        max_retries: 2,
        initial_backoff_ms: 1,
    };
    config.softether.lock_file = None;
    config.softether.cache_ttl_ms = 0;
    config.softether.profile_dir = Some(dir.join("configs"));
    config.reconcile.data_dir = dir.join("data");
    config
}

pub fn api(hub: Arc<FakeHub>, config: &AppConfig, clock: Arc<ManualClock>) -> HubApi {
    HubApi::with_runner(config, hub, clock)
}
