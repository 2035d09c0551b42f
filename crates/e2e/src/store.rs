//! Direct access to the site's account tables, bypassing the UI
//!
//! Used to bootstrap the superuser, to flush the database between scenarios,
//! and to read back (or narrow) the permissions the UI assigned.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::BTreeSet;
use std::path::PathBuf;
use tokio::process::Command as TokioCommand;
use tracing::{debug, info};

use crate::account::Permission;
use crate::error::{E2eError, E2eResult};

#[async_trait]
pub trait BackingStore: Send + Sync {
    /// Delete every row, leaving migrations in place
    async fn reset(&self) -> E2eResult<()>;

    async fn create_superuser(&self, username: &str, email: &str, password: &str) -> E2eResult<()>;

    /// Permissions granted directly to `username`
    async fn permissions(&self, username: &str) -> E2eResult<BTreeSet<Permission>>;

    /// Replace the direct permissions of `username`
    async fn set_permissions(&self, username: &str, permissions: &BTreeSet<Permission>) -> E2eResult<()>;
}

/// Prefix of the single line the shell script prints its result on
const RESULT_MARKER: &str = "ADMIN_E2E_RESULT:";

const OP_ENV: &str = "ADMIN_E2E_OP";
const ARGS_ENV: &str = "ADMIN_E2E_ARGS";

/// Executed with `manage.py shell -c`; reads its operation from the environment
const STORE_SCRIPT: &str = r#"
import json, os
from django.contrib.auth import get_user_model
from django.contrib.auth.models import Permission

op = os.environ["ADMIN_E2E_OP"]
args = json.loads(os.environ["ADMIN_E2E_ARGS"])
User = get_user_model()
result = None

if op == "create_superuser":
    user = User.objects.create_user(args["username"], args["email"], args["password"])
    user.is_superuser = True
    user.is_staff = True
    user.save()
elif op == "permissions":
    user = User.objects.get(username=args["username"])
    result = sorted(p.content_type.app_label + "." + p.codename for p in user.user_permissions.all())
elif op == "set_permissions":
    user = User.objects.get(username=args["username"])
    perms = []
    for key in args["permissions"]:
        app_label, codename = key.split(".", 1)
        perms.append(Permission.objects.get(content_type__app_label=app_label, codename=codename))
    user.user_permissions.set(perms)
    result = len(perms)
else:
    raise SystemExit("unknown operation: " + op)

print("ADMIN_E2E_RESULT:" + json.dumps(result))
"#;

/// A Django project driven through its `manage.py`
#[derive(Debug, Clone)]
pub struct ManagePy {
    /// Python interpreter (a virtualenv's `bin/python` works)
    pub python: PathBuf,

    pub manage_py: PathBuf,

    /// Value for `DJANGO_SETTINGS_MODULE`, if the project needs one set
    pub settings_module: Option<String>,
}

impl Default for ManagePy {
    fn default() -> Self {
        Self {
            python: PathBuf::from("python3"),
            manage_py: PathBuf::from("manage.py"),
            settings_module: None,
        }
    }
}

impl ManagePy {
    /// `python manage.py <args>` with the project's directory as working dir
    pub fn command<I, S>(&self, args: I) -> std::process::Command
    where
        I: IntoIterator<Item = S>,
        S: AsRef<std::ffi::OsStr>,
    {
        let dir = self.manage_py.parent().filter(|d| !d.as_os_str().is_empty());
        // manage.py is resolved relative to the new working directory
        let script = match (dir, self.manage_py.file_name()) {
            (Some(_), Some(name)) => PathBuf::from(name),
            _ => self.manage_py.clone(),
        };

        let mut cmd = std::process::Command::new(&self.python);
        cmd.arg(script).args(args);
        if let Some(dir) = dir {
            cmd.current_dir(dir);
        }
        if let Some(settings) = &self.settings_module {
            cmd.env("DJANGO_SETTINGS_MODULE", settings);
        }
        cmd
    }

    /// Run a management command to completion
    pub async fn run<I, S>(&self, args: I) -> E2eResult<String>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<std::ffi::OsStr>,
    {
        let output = TokioCommand::from(self.command(args)).output().await?;
        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(E2eError::Store(format!(
                "manage.py exited with {}:\nstdout: {}\nstderr: {}",
                output.status, stdout, stderr
            )));
        }
        Ok(stdout)
    }

    async fn shell(&self, op: &str, args: Value) -> E2eResult<Value> {
        debug!("manage.py shell: {} {}", op, args);

        let mut cmd = self.command(["shell", "-c", STORE_SCRIPT]);
        cmd.env(OP_ENV, op).env(ARGS_ENV, args.to_string());

        let output = TokioCommand::from(cmd).output().await?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(E2eError::Store(format!(
                "{} failed with {}:\nstdout: {}\nstderr: {}",
                op, output.status, stdout, stderr
            )));
        }
        parse_result(&stdout)
    }
}

/// Pull the JSON payload off the marked line of the script's stdout
pub fn parse_result(stdout: &str) -> E2eResult<Value> {
    let line = stdout
        .lines()
        .rev()
        .find_map(|line| line.trim().strip_prefix(RESULT_MARKER))
        .ok_or_else(|| E2eError::Store(format!("no result line in output:\n{}", stdout)))?;
    Ok(serde_json::from_str(line)?)
}

#[async_trait]
impl BackingStore for ManagePy {
    async fn reset(&self) -> E2eResult<()> {
        info!("Flushing database");
        self.run(["flush", "--noinput"]).await?;
        Ok(())
    }

    async fn create_superuser(&self, username: &str, email: &str, password: &str) -> E2eResult<()> {
        info!("Creating superuser {} in the backing store", username);
        self.shell(
            "create_superuser",
            json!({ "username": username, "email": email, "password": password }),
        )
        .await?;
        Ok(())
    }

    async fn permissions(&self, username: &str) -> E2eResult<BTreeSet<Permission>> {
        let value = self.shell("permissions", json!({ "username": username })).await?;
        let keys = Vec::<String>::deserialize(value)?;
        keys.iter().map(|key| key.parse()).collect()
    }

    async fn set_permissions(&self, username: &str, permissions: &BTreeSet<Permission>) -> E2eResult<()> {
        let keys: Vec<String> = permissions.iter().map(Permission::natural_key).collect();
        info!("Setting permissions of {} to {:?}", username, keys);
        self.shell("set_permissions", json!({ "username": username, "permissions": keys }))
            .await?;
        Ok(())
    }
}
