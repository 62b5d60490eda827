//! The named database connections of a run.
use std::collections::HashMap;

use crate::context::{DEFAULT_CONNECTION, Executor};
use crate::error::{Error, RatchetResult};

/// One configured connection and the user its session currently runs as.
#[derive(Debug)]
struct Database<E> {
    executor: E,
    default_user: Option<String>,
    active_user: Option<String>,
}

impl<E> Database<E> {
    fn new(executor: E, default_user: Option<String>) -> Self {
        Self {
            executor,
            default_user,
            active_user: None,
        }
    }
}

/// The default connection plus any number of named ones, selected with
/// `SELECT CONNECTION`. Names are case-insensitive.
#[derive(Debug)]
pub struct Databases<E> {
    default: Database<E>,
    named: HashMap<String, Database<E>>,
}

impl<E: Executor> Databases<E> {
    pub fn new(default: E) -> Self {
        Self {
            default: Database::new(default, None),
            named: HashMap::new(),
        }
    }

    /// Run the default connection as `user` unless a directive says
    /// otherwise.
    pub fn set_default_user(&mut self, user: Option<String>) {
        self.default.default_user = user;
    }

    /// Add a named connection.
    pub fn add(&mut self, name: &str, executor: E, default_user: Option<String>) {
        let name = name.to_ascii_lowercase();
        if name == DEFAULT_CONNECTION {
            self.default = Database::new(executor, default_user);
        } else {
            self.named.insert(name, Database::new(executor, default_user));
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_ok()
    }

    fn get(&self, name: &str) -> RatchetResult<&Database<E>> {
        let name = name.to_ascii_lowercase();
        if name == DEFAULT_CONNECTION {
            return Ok(&self.default);
        }
        self.named
            .get(&name)
            .ok_or(Error::UnknownConnection(name))
    }

    fn get_mut(&mut self, name: &str) -> RatchetResult<&mut Database<E>> {
        let name = name.to_ascii_lowercase();
        if name == DEFAULT_CONNECTION {
            return Ok(&mut self.default);
        }
        self.named
            .get_mut(&name)
            .ok_or(Error::UnknownConnection(name))
    }

    /// The user a connection starts with.
    pub fn default_user(&self, name: &str) -> RatchetResult<Option<String>> {
        self.get(name).map(|db| db.default_user.clone())
    }

    /// The executor of the connection the control state lives on.
    pub fn default_executor(&mut self) -> &mut E {
        &mut self.default.executor
    }

    /// The executor for `name`, with its session switched to `user` first if
    /// it runs as someone else.
    pub async fn session(&mut self, name: &str, user: Option<&str>) -> RatchetResult<&mut E> {
        let db = self.get_mut(name)?;
        if db.active_user.as_deref() != user {
            log::debug!(target: "ratchet", "connection {name} switching to user {user:?}");
            db.executor.set_user(user).await.map_err(Error::Database)?;
            db.active_user = user.map(str::to_string);
        }
        Ok(&mut db.executor)
    }
}
