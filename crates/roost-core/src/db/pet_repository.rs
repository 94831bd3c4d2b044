//! Pet repository implementation

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use super::{get_enum, get_time, millis};
use crate::error::{Error, Result};
use crate::models::{NewPet, Pet};

const PET_COLUMNS: &str =
    "id, name, night_rate, day_rate, active, source, external_id, created_at, updated_at";

/// Trait for pet storage operations
pub trait PetRepository {
    /// Insert a new pet
    fn create(&self, pet: &NewPet, now: DateTime<Utc>) -> Result<Pet>;

    /// Get a pet by ID
    fn get(&self, id: &str) -> Result<Option<Pet>>;

    /// Find the pet linked to a booking-site id
    fn find_by_external_id(&self, external_id: &str) -> Result<Option<Pet>>;

    /// Find a pet by name, ignoring case (oldest first when several match)
    fn find_by_name(&self, name: &str) -> Result<Option<Pet>>;

    /// Persist every mutable field of an existing pet
    fn update(&self, pet: &Pet) -> Result<()>;

    /// List all pets by name
    fn list(&self) -> Result<Vec<Pet>>;
}

/// `SQLite` implementation of `PetRepository`
pub struct SqlitePetRepository<'a> {
    conn: &'a Connection,
}

impl<'a> SqlitePetRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn parse_pet(row: &rusqlite::Row<'_>) -> rusqlite::Result<Pet> {
        Ok(Pet {
            id: row.get(0)?,
            name: row.get(1)?,
            night_rate: row.get(2)?,
            day_rate: row.get(3)?,
            active: row.get(4)?,
            source: get_enum(row, 5)?,
            external_id: row.get(6)?,
            created_at: get_time(row, 7)?,
            updated_at: get_time(row, 8)?,
        })
    }

    fn query_one(&self, filter: &str, value: &str) -> Result<Option<Pet>> {
        let sql = format!("SELECT {PET_COLUMNS} FROM pets WHERE {filter} ORDER BY created_at LIMIT 1");
        Ok(self
            .conn
            .query_row(&sql, params![value], Self::parse_pet)
            .optional()?)
    }
}

impl PetRepository for SqlitePetRepository<'_> {
    fn create(&self, pet: &NewPet, now: DateTime<Utc>) -> Result<Pet> {
        let created = Pet {
            id: Uuid::now_v7().to_string(),
            name: pet.name.clone(),
            night_rate: pet.night_rate,
            day_rate: pet.day_rate,
            active: true,
            source: pet.source,
            external_id: pet.external_id.clone(),
            created_at: now,
            updated_at: now,
        };

        self.conn.execute(
            "INSERT INTO pets (id, name, night_rate, day_rate, active, source, external_id, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                created.id,
                created.name,
                created.night_rate,
                created.day_rate,
                created.active,
                created.source.as_str(),
                created.external_id,
                millis(created.created_at),
                millis(created.updated_at),
            ],
        )?;

        Ok(created)
    }

    fn get(&self, id: &str) -> Result<Option<Pet>> {
        self.query_one("id = ?", id)
    }

    fn find_by_external_id(&self, external_id: &str) -> Result<Option<Pet>> {
        self.query_one("external_id = ?", external_id)
    }

    fn find_by_name(&self, name: &str) -> Result<Option<Pet>> {
        self.query_one("name = ? COLLATE NOCASE", name.trim())
    }

    fn update(&self, pet: &Pet) -> Result<()> {
        let rows = self.conn.execute(
            "UPDATE pets
             SET name = ?, night_rate = ?, day_rate = ?, active = ?, source = ?, external_id = ?, updated_at = ?
             WHERE id = ?",
            params![
                pet.name,
                pet.night_rate,
                pet.day_rate,
                pet.active,
                pet.source.as_str(),
                pet.external_id,
                millis(pet.updated_at),
                pet.id,
            ],
        )?;

        if rows == 0 {
            return Err(Error::NotFound(format!("pet {}", pet.id)));
        }
        Ok(())
    }

    fn list(&self) -> Result<Vec<Pet>> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT {PET_COLUMNS} FROM pets ORDER BY name COLLATE NOCASE"))?;

        let pets = stmt
            .query_map([], Self::parse_pet)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(pets)
    }
}
