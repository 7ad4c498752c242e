//! Typed operations for the event ticketing datasets.
//!
//! Thin wrappers that turn typed inserts and updates into rows and read
//! materialized rows back into typed records.

use crate::database::Database;
use crate::error::Result;
use chrono::SecondsFormat;
use serde::{Deserialize, Serialize};
use tkkt_core::{Dataset, Row, Value};
use ulid::Ulid;

/// Row id of a student: students are unique per event.
pub fn student_row_id(event_id: &str, sid: &str) -> String {
    format!("{}_{}", event_id, sid)
}

fn text(row: &Row, col: &str) -> Option<String> {
    row.get(col).and_then(Value::as_str).map(str::to_string)
}

fn flag(row: &Row, col: &str) -> bool {
    row.get(col).and_then(Value::as_bool).unwrap_or(false)
}

fn set_opt(row: &mut Row, col: &str, value: Option<impl Into<Value>>) {
    if let Some(value) = value {
        row.set(col, value);
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub id: String,
    pub name: Option<String>,
    pub max_tickets: Option<f64>,
    pub tombstone: bool,
}

impl From<Row> for Event {
    fn from(row: Row) -> Self {
        Self {
            name: text(&row, "name"),
            max_tickets: row.get("maxTickets").and_then(Value::as_f64),
            tombstone: flag(&row, "tombstone"),
            id: row.id().to_string(),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventUpsert {
    pub id: String,
    pub name: Option<String>,
    pub max_tickets: Option<f64>,
    pub tombstone: Option<bool>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Student {
    pub id: String,
    pub sid: String,
    pub event_id: String,
    pub name: Option<String>,
    pub tombstone: bool,
}

impl From<Row> for Student {
    fn from(row: Row) -> Self {
        Self {
            sid: text(&row, "sid").unwrap_or_default(),
            event_id: text(&row, "eventId").unwrap_or_default(),
            name: text(&row, "name"),
            tombstone: flag(&row, "tombstone"),
            id: row.id().to_string(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentInsert {
    pub sid: String,
    pub event_id: String,
    pub name: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentUpdate {
    pub sid: String,
    pub event_id: String,
    pub name: Option<String>,
    pub tombstone: Option<bool>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ticket {
    pub id: String,
    pub student_sid: String,
    pub event_id: String,
    pub redeemed: bool,
    pub tombstone: bool,
}

impl From<Row> for Ticket {
    fn from(row: Row) -> Self {
        Self {
            student_sid: text(&row, "studentSid").unwrap_or_default(),
            event_id: text(&row, "eventId").unwrap_or_default(),
            redeemed: flag(&row, "redeemed"),
            tombstone: flag(&row, "tombstone"),
            id: row.id().to_string(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TicketInsert {
    pub id: String,
    pub student_sid: String,
    pub event_id: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TicketUpdate {
    pub id: String,
    pub redeemed: Option<bool>,
    pub tombstone: Option<bool>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Admin {
    pub id: String,
    pub event_id: Option<String>,
    pub name: Option<String>,
    pub tombstone: bool,
}

impl From<Row> for Admin {
    fn from(row: Row) -> Self {
        Self {
            event_id: text(&row, "eventId"),
            name: text(&row, "name"),
            tombstone: flag(&row, "tombstone"),
            id: row.id().to_string(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminInsert {
    pub id: String,
    pub name: Option<String>,
    pub event_id: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminUpdate {
    pub id: String,
    pub name: Option<String>,
    pub tombstone: Option<bool>,
}

/// An admin letting a student through the door.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentAccess {
    pub event_id: String,
    pub student_sid: String,
    pub admin_id: String,
}

impl Database {
    /// Create or update an event; `false` when nothing changed.
    pub async fn upsert_event(&self, event: EventUpsert, actor: &str) -> Result<bool> {
        let mut row = Row::new(event.id);
        set_opt(&mut row, "name", event.name);
        set_opt(&mut row, "maxTickets", event.max_tickets);
        set_opt(&mut row, "tombstone", event.tombstone);
        self.write(Dataset::Events, row, actor).await
    }

    pub async fn get_event(&self, id: &str) -> Result<Option<Event>> {
        Ok(self.get(Dataset::Events, id).await?.map(Event::from))
    }

    pub async fn insert_student(&self, student: StudentInsert, actor: &str) -> Result<String> {
        let id = student_row_id(&student.event_id, &student.sid);
        let mut row = Row::new(id.clone())
            .with("sid", student.sid)
            .with("eventId", student.event_id);
        set_opt(&mut row, "name", student.name);
        self.insert(Dataset::Students, row, actor).await?;
        Ok(id)
    }

    /// Update a student; `false` when nothing changed.
    pub async fn update_student(&self, student: StudentUpdate, actor: &str) -> Result<bool> {
        let mut row = Row::new(student_row_id(&student.event_id, &student.sid))
            .with("sid", student.sid)
            .with("eventId", student.event_id);
        set_opt(&mut row, "name", student.name);
        set_opt(&mut row, "tombstone", student.tombstone);
        self.write(Dataset::Students, row, actor).await
    }

    pub async fn get_student(&self, event_id: &str, sid: &str) -> Result<Option<Student>> {
        let id = student_row_id(event_id, sid);
        Ok(self.get(Dataset::Students, &id).await?.map(Student::from))
    }

    /// Students of one event, ordered by row id.
    pub async fn students_for_event(&self, event_id: &str) -> Result<Vec<Student>> {
        Ok(self
            .list(Dataset::Students)
            .await?
            .into_iter()
            .map(Student::from)
            .filter(|s| s.event_id == event_id)
            .collect())
    }

    pub async fn add_ticket(&self, ticket: TicketInsert, actor: &str) -> Result<()> {
        let row = Row::new(ticket.id)
            .with("studentSid", ticket.student_sid)
            .with("eventId", ticket.event_id);
        self.insert(Dataset::Tickets, row, actor).await?;
        Ok(())
    }

    /// Update a ticket; `false` when the ticket does not exist.
    ///
    /// The given fields are written even when unchanged.
    pub async fn update_ticket(&self, ticket: TicketUpdate, actor: &str) -> Result<bool> {
        if self.get(Dataset::Tickets, &ticket.id).await?.is_none() {
            return Ok(false);
        }
        let mut row = Row::new(ticket.id);
        set_opt(&mut row, "redeemed", ticket.redeemed);
        set_opt(&mut row, "tombstone", ticket.tombstone);
        self.insert(Dataset::Tickets, row, actor).await?;
        Ok(true)
    }

    pub async fn get_ticket(&self, id: &str) -> Result<Option<Ticket>> {
        Ok(self.get(Dataset::Tickets, id).await?.map(Ticket::from))
    }

    /// Live tickets held by one student at one event.
    pub async fn tickets_for_student(&self, event_id: &str, sid: &str) -> Result<Vec<Ticket>> {
        Ok(self
            .list(Dataset::Tickets)
            .await?
            .into_iter()
            .map(Ticket::from)
            .filter(|t| t.event_id == event_id && t.student_sid == sid && !t.tombstone)
            .collect())
    }

    pub async fn insert_admin(&self, admin: AdminInsert, actor: &str) -> Result<()> {
        let mut row = Row::new(admin.id).with("eventId", admin.event_id);
        set_opt(&mut row, "name", admin.name);
        self.insert(Dataset::Admins, row, actor).await?;
        Ok(())
    }

    /// Update an admin; `false` when nothing changed.
    pub async fn update_admin(&self, admin: AdminUpdate, actor: &str) -> Result<bool> {
        let mut row = Row::new(admin.id);
        set_opt(&mut row, "name", admin.name);
        set_opt(&mut row, "tombstone", admin.tombstone);
        self.write(Dataset::Admins, row, actor).await
    }

    pub async fn get_admin(&self, id: &str) -> Result<Option<Admin>> {
        Ok(self.get(Dataset::Admins, id).await?.map(Admin::from))
    }

    /// Record a door check; returns the new log entry's id.
    pub async fn log_student_access(&self, access: StudentAccess, actor: &str) -> Result<String> {
        let id = Ulid::new().to_string();
        let at = self.tick()?.date_time().to_rfc3339_opts(SecondsFormat::Millis, true);
        let row = Row::new(id.clone())
            .with("studentSid", access.student_sid)
            .with("eventId", access.event_id)
            .with("adminId", access.admin_id)
            .with("timestamp", at);
        self.insert(Dataset::AccessStudentLogs, row, actor).await?;
        Ok(id)
    }
}
