//! Statements and the connection front end.

use async_trait::async_trait;

use crate::client::Client;
use crate::error::{Error, Result};
use crate::row::{ExecResult, Rows};

/// Database connection as seen by application code.
///
/// `#[async_trait]` keeps the trait object safe, so callers can hold a
/// `Box<dyn SqlConnection>`.
#[async_trait]
pub trait SqlConnection: Send + Sync {
    /// Prepare `sql` for later execution.
    async fn prepare(&self, sql: &str) -> Result<Statement>;

    /// Run a statement that returns no rows.
    async fn execute(&self, sql: &str) -> Result<ExecResult>;

    /// Run a statement that returns rows.
    async fn query(&self, sql: &str) -> Result<Rows>;

    /// Close the connection.
    async fn close(&self) -> Result<()>;
}

#[async_trait]
impl SqlConnection for Client {
    async fn prepare(&self, sql: &str) -> Result<Statement> {
        self.ensure_query_allowed()?;
        Ok(Statement::new(self.clone(), sql))
    }

    async fn execute(&self, sql: &str) -> Result<ExecResult> {
        Client::execute(self, sql).await
    }

    async fn query(&self, sql: &str) -> Result<Rows> {
        Client::query(self, sql).await
    }

    async fn close(&self) -> Result<()> {
        Client::close(self).await
    }
}

/// A statement bound to the connection that prepared it.
///
/// Preparing is client-side only: the text is kept and sent as a SQL batch
/// on execution. Argument binding is not supported, so a statement with
/// `?` placeholders cannot be executed.
#[derive(Debug, Clone)]
pub struct Statement {
    client: Client,
    sql: String,
    num_input: usize,
}

impl Statement {
    fn new(client: Client, sql: &str) -> Self {
        Self {
            client,
            sql: sql.to_string(),
            num_input: count_placeholders(sql),
        }
    }

    /// Statement text.
    #[must_use]
    pub fn sql(&self) -> &str {
        &self.sql
    }

    /// Number of `?` placeholders outside literals and quoted identifiers.
    #[must_use]
    pub fn num_input(&self) -> usize {
        self.num_input
    }

    /// Run the statement, expecting no rows.
    pub async fn execute(&self) -> Result<ExecResult> {
        self.check_unbound()?;
        self.client.execute(&self.sql).await
    }

    /// Run the statement, returning its rows.
    pub async fn query(&self) -> Result<Rows> {
        self.check_unbound()?;
        self.client.query(&self.sql).await
    }

    fn check_unbound(&self) -> Result<()> {
        if self.num_input > 0 {
            return Err(Error::InvalidArgument(format!(
                "statement has {} placeholder(s) and argument binding is not supported",
                self.num_input
            )));
        }
        Ok(())
    }
}

fn count_placeholders(sql: &str) -> usize {
    let mut count = 0;
    let mut closing: Option<char> = None;

    for c in sql.chars() {
        match closing {
            // A doubled quote closes and reopens, which nets out.
            Some(end) if c == end => closing = None,
            Some(_) => {}
            None => match c {
                '\'' => closing = Some('\''),
                '"' => closing = Some('"'),
                '[' => closing = Some(']'),
                '?' => count += 1,
                _ => {}
            },
        }
    }
    count
}
