//! Maps scraped appointments onto pets, stays and sync records.

use chrono::{DateTime, Utc};
use rusqlite::Connection;

use super::change::detect_changes;
use crate::db::{
    PetRepository, SqlitePetRepository, SqliteStayRepository, SqliteSyncRecordRepository,
    StayRepository, SyncRecordRepository,
};
use crate::error::Result;
use crate::models::{
    ChangeDetail, ChangeType, ExternalAppointment, NewPet, NewStay, Pet, PetRate, RecordSource,
    Stay, SyncRecord, SyncStatus,
};
use crate::parse::classify_rates;

/// Name given to pets when the page did not show one
pub const UNKNOWN_PET_NAME: &str = "Unknown";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MapperOptions {
    /// Let booking-site data replace owner-entered pets and stays
    pub overwrite_manual: bool,
    /// Rewrite the sync record even when its content hash matches
    pub force_update: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EntityOutcome {
    pub created: bool,
    pub updated: bool,
}

impl EntityOutcome {
    const CREATED: Self = Self {
        created: true,
        updated: false,
    };

    const fn updated(updated: bool) -> Self {
        Self {
            created: false,
            updated,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SaveOutcome {
    pub pet_id: String,
    pub stay_id: Option<String>,
    pub pet: EntityOutcome,
    pub stay: EntityOutcome,
    pub record: ChangeType,
    pub change: ChangeDetail,
}

impl SaveOutcome {
    /// Overall action for run counters
    pub const fn action(&self) -> ChangeType {
        match self.record {
            ChangeType::Created => ChangeType::Created,
            ChangeType::Updated => ChangeType::Updated,
            _ if self.pet.created
                || self.pet.updated
                || self.stay.created
                || self.stay.updated =>
            {
                ChangeType::Updated
            }
            _ => ChangeType::Unchanged,
        }
    }
}

/// Pricing values written onto an external stay
#[derive(Debug, Clone, Copy, PartialEq)]
struct StayPricing {
    billed_amount: Option<f64>,
    rates: PetRate,
}

pub struct EntityMapper<'a> {
    pets: SqlitePetRepository<'a>,
    stays: SqliteStayRepository<'a>,
    records: SqliteSyncRecordRepository<'a>,
    options: MapperOptions,
}

impl<'a> EntityMapper<'a> {
    pub const fn new(conn: &'a Connection, options: MapperOptions) -> Self {
        Self {
            pets: SqlitePetRepository::new(conn),
            stays: SqliteStayRepository::new(conn),
            records: SqliteSyncRecordRepository::new(conn),
            options,
        }
    }

    /// Save one appointment: every pet with its stay, then the sync record
    pub fn save_appointment(
        &self,
        appointment: &ExternalAppointment,
        now: DateTime<Utc>,
    ) -> Result<SaveOutcome> {
        let pet_names = appointment.pet_names();
        let primary_name = pet_names
            .first()
            .cloned()
            .unwrap_or_else(|| UNKNOWN_PET_NAME.to_string());

        let pricing = appointment.pricing.as_ref();
        let primary_rates = pricing.map(|pricing| classify_rates(&pricing.line_items));
        let per_pet_rates = pricing.and_then(|pricing| pricing.per_pet_rates.as_deref());

        let (pet, pet_outcome) = self.upsert_pet(
            &primary_name,
            Some(&appointment.external_id),
            primary_rates,
            now,
        )?;

        let dates = appointment.check_in.zip(appointment.check_out);
        let mut stay_id = None;
        let mut stay_outcome = EntityOutcome::default();
        if let Some((arrival, departure)) = dates {
            let stay_pricing = pricing.map(|pricing| StayPricing {
                billed_amount: Some(pricing.total),
                rates: primary_rates.unwrap_or_default(),
            });
            let (stay, outcome) = self.upsert_stay(
                &pet.id,
                &appointment.external_id,
                (arrival, departure),
                stay_pricing,
                now,
            )?;
            stay_id = Some(stay.id);
            stay_outcome = outcome;
        }

        for (index, name) in pet_names.iter().enumerate().skip(1) {
            let rates = per_pet_rates.and_then(|rates| rates.get(index)).copied();
            let (secondary, _) = self.upsert_pet(name, None, rates, now)?;
            if let Some(range) = dates {
                let stay_pricing = pricing.map(|_| StayPricing {
                    billed_amount: None,
                    rates: rates.unwrap_or_default(),
                });
                self.upsert_stay(
                    &secondary.id,
                    &format!("{}_p{index}", appointment.external_id),
                    range,
                    stay_pricing,
                    now,
                )?;
            }
        }

        let record = self.upsert_record(appointment, &pet.id, stay_id.as_deref(), now)?;

        tracing::debug!(
            external_id = %appointment.external_id,
            record = %record.last_change_type,
            "Saved appointment"
        );

        Ok(SaveOutcome {
            pet_id: pet.id,
            stay_id,
            pet: pet_outcome,
            stay: stay_outcome,
            record: record.last_change_type,
            change: ChangeDetail {
                external_id: appointment.external_id.clone(),
                pet_name: Some(primary_name),
                action: record.last_change_type,
                check_in: appointment.check_in,
                check_out: appointment.check_out,
                changed_fields: record.changed_fields.clone(),
            },
        })
    }

    fn may_overwrite(&self, source: RecordSource) -> bool {
        source == RecordSource::External || self.options.overwrite_manual
    }

    fn apply_rates(pet: &mut Pet, rates: Option<PetRate>) {
        let Some(rates) = rates else { return };
        if let Some(night) = rates.night_rate.filter(|rate| *rate > 0.0) {
            pet.night_rate = night;
        }
        if let Some(day) = rates.day_rate.filter(|rate| *rate > 0.0) {
            pet.day_rate = day;
        }
    }

    fn save_pet_if_changed(&self, original: &Pet, mut pet: Pet, now: DateTime<Utc>) -> Result<(Pet, EntityOutcome)> {
        if pet == *original {
            return Ok((pet, EntityOutcome::default()));
        }
        pet.updated_at = now;
        self.pets.update(&pet)?;
        Ok((pet, EntityOutcome::updated(true)))
    }

    fn upsert_pet(
        &self,
        name: &str,
        external_id: Option<&str>,
        rates: Option<PetRate>,
        now: DateTime<Utc>,
    ) -> Result<(Pet, EntityOutcome)> {
        if let Some(external_id) = external_id {
            if let Some(original) = self.pets.find_by_external_id(external_id)? {
                let mut pet = original.clone();
                if self.may_overwrite(pet.source) {
                    pet.name = name.to_string();
                    pet.active = true;
                    Self::apply_rates(&mut pet, rates);
                }
                return self.save_pet_if_changed(&original, pet, now);
            }
        }

        if let Some(original) = self.pets.find_by_name(name)? {
            let mut pet = original.clone();
            if pet.is_manual() && !self.options.overwrite_manual {
                if pet.external_id.is_none() {
                    tracing::info!(pet = %pet.name, "Linking manual pet to booking site");
                    pet.external_id = external_id.map(str::to_string);
                }
            } else {
                pet.source = RecordSource::External;
                pet.active = true;
                if pet.external_id.is_none() {
                    pet.external_id = external_id.map(str::to_string);
                }
                Self::apply_rates(&mut pet, rates);
            }
            return self.save_pet_if_changed(&original, pet, now);
        }

        let rates = rates.unwrap_or_default();
        let pet = self.pets.create(
            &NewPet {
                name: name.to_string(),
                night_rate: rates.night_rate.unwrap_or(0.0),
                day_rate: rates.day_rate.unwrap_or(0.0),
                source: RecordSource::External,
                external_id: external_id.map(str::to_string),
            },
            now,
        )?;
        Ok((pet, EntityOutcome::CREATED))
    }

    fn upsert_stay(
        &self,
        pet_id: &str,
        external_id: &str,
        (arrival, departure): (DateTime<Utc>, DateTime<Utc>),
        pricing: Option<StayPricing>,
        now: DateTime<Utc>,
    ) -> Result<(Stay, EntityOutcome)> {
        let mut existing = self.stays.find_by_external_id(external_id)?;

        if existing.is_none() {
            match self.stays.find_overlapping(pet_id, arrival, departure)? {
                Some(overlap) if overlap.external_id.is_none() => {
                    tracing::info!(stay = %overlap.id, external_id, "Linking existing stay");
                    existing = Some(overlap);
                }
                Some(overlap) => {
                    tracing::debug!(
                        stay = %overlap.id,
                        external_id,
                        "Overlapping stay belongs to another appointment, creating a new one"
                    );
                }
                None => {}
            }
        }

        let Some(original) = existing else {
            let stay = self.stays.create(
                &NewStay {
                    pet_id: pet_id.to_string(),
                    arrival,
                    departure,
                    external_id: Some(external_id.to_string()),
                    source: RecordSource::External,
                    billed_amount: pricing.and_then(|pricing| pricing.billed_amount),
                    night_rate: pricing.and_then(|pricing| pricing.rates.night_rate),
                    day_rate: pricing.and_then(|pricing| pricing.rates.day_rate),
                },
                now,
            )?;
            return Ok((stay, EntityOutcome::CREATED));
        };

        let mut stay = original.clone();
        stay.pet_id = pet_id.to_string();
        stay.arrival = arrival;
        stay.departure = departure;
        stay.external_id = Some(external_id.to_string());
        if self.may_overwrite(stay.source) {
            stay.source = RecordSource::External;
            if let Some(pricing) = pricing {
                stay.billed_amount = pricing.billed_amount;
                stay.night_rate = pricing.rates.night_rate;
                stay.day_rate = pricing.rates.day_rate;
            }
        }

        if stay == original {
            return Ok((stay, EntityOutcome::default()));
        }
        stay.updated_at = now;
        self.stays.update(&stay)?;
        Ok((stay, EntityOutcome::updated(true)))
    }

    fn upsert_record(
        &self,
        appointment: &ExternalAppointment,
        pet_id: &str,
        stay_id: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<SyncRecord> {
        let existing = self.records.get_by_external_id(&appointment.external_id)?;
        let changes = detect_changes(existing.as_ref(), appointment);

        let Some(mut record) = existing else {
            let record = SyncRecord {
                id: uuid::Uuid::now_v7().to_string(),
                external_id: appointment.external_id.clone(),
                source_url: appointment.source_url.clone(),
                data: appointment.clone(),
                content_hash: changes.hash,
                last_change_type: ChangeType::Created,
                changed_fields: None,
                previous_data: None,
                pet_id: Some(pet_id.to_string()),
                stay_id: stay_id.map(str::to_string),
                sync_status: SyncStatus::Active,
                missing_sync_count: 0,
                missing_since: None,
                first_synced_at: now,
                last_synced_at: now,
                last_changed_at: now,
            };
            self.records.insert(&record)?;
            return Ok(record);
        };

        // Derived fields such as pricing are refreshed even on the unchanged path
        record.data = appointment.clone();
        record.source_url = appointment.source_url.clone();
        record.pet_id = Some(pet_id.to_string());
        if stay_id.is_some() {
            record.stay_id = stay_id.map(str::to_string);
        }
        record.sync_status = SyncStatus::Active;
        record.missing_sync_count = 0;
        record.missing_since = None;
        record.last_synced_at = now;

        if changes.change_type == ChangeType::Unchanged && !self.options.force_update {
            record.last_change_type = ChangeType::Unchanged;
            record.changed_fields = None;
        } else {
            record.last_change_type = changes.change_type;
            record.content_hash = changes.hash;
            record.changed_fields = changes.changed_fields;
            record.previous_data = changes.previous_data;
            record.last_changed_at = now;
        }

        self.records.update(&record)?;
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::db::Database;
    use crate::models::{LineItem, Pricing};

    fn setup() -> Database {
        Database::open_in_memory().unwrap()
    }

    fn at(text: &str) -> DateTime<Utc> {
        text.parse().unwrap()
    }

    fn appointment(external_id: &str, pet: &str) -> ExternalAppointment {
        ExternalAppointment {
            external_id: external_id.into(),
            source_url: format!("https://site.test/schedule/a/{external_id}/1"),
            status: Some("Scheduled".into()),
            check_in: Some(at("2026-02-13T17:00:00Z")),
            check_out: Some(at("2026-02-18T10:00:00Z")),
            pet_name: Some(pet.into()),
            ..ExternalAppointment::default()
        }
    }

    fn pricing(night: f64, day: f64) -> Pricing {
        Pricing {
            total: night * 5.0 + day,
            line_items: vec![
                LineItem {
                    service_name: "Boarding".into(),
                    rate: night,
                    qty: 5.0,
                    amount: night * 5.0,
                },
                LineItem {
                    service_name: "Boarding (Days)".into(),
                    rate: day,
                    qty: 1.0,
                    amount: day,
                },
            ],
            per_pet_rates: None,
        }
    }

    #[test]
    fn first_save_creates_everything() {
        let db = setup();
        let mapper = EntityMapper::new(db.connection(), MapperOptions::default());
        let mut incoming = appointment("ABC123", "Luna");
        incoming.pricing = Some(pricing(55.0, 50.0));

        let outcome = mapper.save_appointment(&incoming, Utc::now()).unwrap();

        assert_eq!(outcome.action(), ChangeType::Created);
        assert!(outcome.pet.created);
        assert!(outcome.stay.created);

        let pets = SqlitePetRepository::new(db.connection());
        let pet = pets.get(&outcome.pet_id).unwrap().unwrap();
        assert_eq!(pet.night_rate, 55.0);
        assert_eq!(pet.day_rate, 50.0);
        assert_eq!(pet.source, RecordSource::External);

        let stays = SqliteStayRepository::new(db.connection());
        let stay = stays.get(outcome.stay_id.as_deref().unwrap()).unwrap().unwrap();
        assert_eq!(stay.billed_amount, Some(325.0));
        assert_eq!(stay.external_id.as_deref(), Some("ABC123"));
    }

    #[test]
    fn saving_twice_is_idempotent() {
        let db = setup();
        let mapper = EntityMapper::new(db.connection(), MapperOptions::default());
        let incoming = appointment("ABC123", "Luna");

        let first = mapper.save_appointment(&incoming, Utc::now()).unwrap();
        let second = mapper.save_appointment(&incoming, Utc::now()).unwrap();

        assert_eq!(second.action(), ChangeType::Unchanged);
        assert_eq!(first.pet_id, second.pet_id);
        assert_eq!(first.stay_id, second.stay_id);
        assert_eq!(SqlitePetRepository::new(db.connection()).list().unwrap().len(), 1);
        assert_eq!(
            SqliteStayRepository::new(db.connection())
                .list_for_pet(&first.pet_id)
                .unwrap()
                .len(),
            1
        );
    }

    #[test]
    fn manual_pet_matched_by_name_is_soft_linked() {
        let db = setup();
        let pets = SqlitePetRepository::new(db.connection());
        let manual = pets
            .create(&NewPet::manual("Biscuit", 40.0, 30.0), Utc::now())
            .unwrap();
        let mapper = EntityMapper::new(db.connection(), MapperOptions::default());
        let mut incoming = appointment("BIS1", "biscuit");
        incoming.pricing = Some(pricing(65.0, 45.0));

        let outcome = mapper.save_appointment(&incoming, Utc::now()).unwrap();

        assert!(outcome.pet.updated);
        assert_eq!(outcome.pet_id, manual.id);
        let pet = pets.get(&manual.id).unwrap().unwrap();
        assert_eq!(pet.source, RecordSource::Manual);
        assert_eq!(pet.external_id.as_deref(), Some("BIS1"));
        assert_eq!(pet.name, "Biscuit");
        assert_eq!(pet.night_rate, 40.0);
    }

    #[test]
    fn overwrite_converts_manual_pet_and_syncs_rates() {
        let db = setup();
        let pets = SqlitePetRepository::new(db.connection());
        let manual = pets
            .create(&NewPet::manual("Biscuit", 40.0, 30.0), Utc::now())
            .unwrap();
        let mapper = EntityMapper::new(
            db.connection(),
            MapperOptions {
                overwrite_manual: true,
                force_update: false,
            },
        );
        let mut incoming = appointment("BIS1", "Biscuit");
        incoming.pricing = Some(pricing(65.0, 45.0));

        mapper.save_appointment(&incoming, Utc::now()).unwrap();

        let pet = pets.get(&manual.id).unwrap().unwrap();
        assert_eq!(pet.source, RecordSource::External);
        assert_eq!(pet.night_rate, 65.0);
        assert_eq!(pet.day_rate, 45.0);
    }

    #[test]
    fn manual_stay_is_linked_but_keeps_owner_values() {
        let db = setup();
        let pets = SqlitePetRepository::new(db.connection());
        let stays = SqliteStayRepository::new(db.connection());
        let pet = pets
            .create(&NewPet::manual("Luna", 50.0, 40.0), Utc::now())
            .unwrap();
        let mut manual = NewStay::manual(
            &pet.id,
            at("2026-02-13T00:00:00Z"),
            at("2026-02-18T00:00:00Z"),
        );
        manual.billed_amount = Some(300.0);
        let manual = stays.create(&manual, Utc::now()).unwrap();

        let mapper = EntityMapper::new(db.connection(), MapperOptions::default());
        let mut incoming = appointment("LUN1", "Luna");
        incoming.pricing = Some(pricing(55.0, 50.0));
        let outcome = mapper.save_appointment(&incoming, Utc::now()).unwrap();

        assert_eq!(outcome.stay_id.as_deref(), Some(manual.id.as_str()));
        let linked = stays.get(&manual.id).unwrap().unwrap();
        assert_eq!(linked.external_id.as_deref(), Some("LUN1"));
        assert_eq!(linked.arrival, at("2026-02-13T17:00:00Z"));
        assert_eq!(linked.source, RecordSource::Manual);
        assert_eq!(linked.billed_amount, Some(300.0));
    }

    #[test]
    fn overlapping_stay_of_another_appointment_is_not_merged() {
        let db = setup();
        let mapper = EntityMapper::new(db.connection(), MapperOptions::default());

        let first = mapper
            .save_appointment(&appointment("APPT-A", "Luna"), Utc::now())
            .unwrap();
        let mut amended = appointment("APPT-B", "Luna");
        amended.check_in = Some(at("2026-02-14T17:00:00Z"));
        let second = mapper.save_appointment(&amended, Utc::now()).unwrap();

        assert_eq!(first.pet_id, second.pet_id);
        assert_ne!(first.stay_id, second.stay_id);
        assert!(second.stay.created);
        let stays = SqliteStayRepository::new(db.connection())
            .list_for_pet(&first.pet_id)
            .unwrap();
        assert_eq!(stays.len(), 2);
    }

    #[test]
    fn multi_pet_appointment_creates_suffixed_stays() {
        let db = setup();
        let mapper = EntityMapper::new(db.connection(), MapperOptions::default());
        let mut incoming = appointment("MULTI1", "Mochi");
        incoming.all_pet_names = vec!["Mochi".into(), "Marlee".into()];
        let mut prices = pricing(55.0, 50.0);
        prices.per_pet_rates = Some(vec![
            PetRate {
                night_rate: Some(55.0),
                day_rate: Some(50.0),
            },
            PetRate {
                night_rate: Some(45.0),
                day_rate: Some(50.0),
            },
        ]);
        incoming.pricing = Some(prices);

        mapper.save_appointment(&incoming, Utc::now()).unwrap();

        let stays = SqliteStayRepository::new(db.connection());
        let secondary = stays.find_by_external_id("MULTI1_p1").unwrap().unwrap();
        assert_eq!(secondary.night_rate, Some(45.0));
        assert_eq!(secondary.billed_amount, None);
        let marlee = SqlitePetRepository::new(db.connection())
            .find_by_name("Marlee")
            .unwrap()
            .unwrap();
        assert_eq!(marlee.id, secondary.pet_id);
        assert_eq!(marlee.external_id, None);
        assert_eq!(marlee.night_rate, 45.0);
    }

    #[test]
    fn unchanged_record_still_refreshes_pricing() {
        let db = setup();
        let mapper = EntityMapper::new(db.connection(), MapperOptions::default());
        let incoming = appointment("ABC123", "Luna");
        mapper.save_appointment(&incoming, Utc::now()).unwrap();

        let mut with_pricing = incoming.clone();
        with_pricing.pricing = Some(pricing(55.0, 50.0));
        let outcome = mapper
            .save_appointment(&with_pricing, Utc::now() + Duration::hours(1))
            .unwrap();

        assert_eq!(outcome.record, ChangeType::Unchanged);
        let record = SqliteSyncRecordRepository::new(db.connection())
            .get_by_external_id("ABC123")
            .unwrap()
            .unwrap();
        assert_eq!(record.data.pricing, with_pricing.pricing);
    }

    #[test]
    fn changed_status_is_an_update_with_diff() {
        let db = setup();
        let mapper = EntityMapper::new(db.connection(), MapperOptions::default());
        let incoming = appointment("ABC123", "Luna");
        mapper.save_appointment(&incoming, Utc::now()).unwrap();

        let mut cancelled = incoming.clone();
        cancelled.status = Some("Cancelled".into());
        let outcome = mapper.save_appointment(&cancelled, Utc::now()).unwrap();

        assert_eq!(outcome.action(), ChangeType::Updated);
        let fields = outcome.change.changed_fields.unwrap();
        assert!(fields.contains_key("status"));
    }
}
