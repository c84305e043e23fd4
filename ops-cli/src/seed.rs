//! Reference data for a fresh installation
//!
//! Seeding is idempotent: rows are matched by code and only missing ones are
//! created.

use batching_service::{
    BatchStore, BatchingError, BatchingResult, NewInsurer, NewProvider, NewSpecialty,
};
use serde::Serialize;
use std::collections::HashMap;
use tracing::info;

const SPECIALTIES: &[(&str, &str)] = &[
    ("Cardiology", "CARD"),
    ("Orthopedics", "ORTH"),
    ("Neurology", "NEUR"),
    ("Oncology", "ONCO"),
    ("Pediatrics", "PEDI"),
    ("Dermatology", "DERM"),
    ("Gastroenterology", "GAST"),
];

struct InsurerSeed {
    name: &'static str,
    code: &'static str,
    email: &'static str,
    daily_capacity: i64,
    min_batch_size: i64,
    max_batch_size: i64,
    prefers_encounter_date: bool,
    efficiency: &'static [(&'static str, f64)],
}

const INSURERS: &[InsurerSeed] = &[
    InsurerSeed {
        name: "HealthFirst Insurance",
        code: "HFI",
        email: "claims@healthfirst.example.com",
        daily_capacity: 150,
        min_batch_size: 10,
        max_batch_size: 50,
        prefers_encounter_date: true,
        efficiency: &[("CARD", 0.8), ("ORTH", 1.1), ("NEUR", 1.2), ("ONCO", 0.9)],
    },
    InsurerSeed {
        name: "National Medical Insurance",
        code: "NMI",
        email: "claims@nationalmedical.example.com",
        daily_capacity: 200,
        min_batch_size: 5,
        max_batch_size: 75,
        prefers_encounter_date: false,
        efficiency: &[("ORTH", 0.7), ("PEDI", 0.8), ("DERM", 1.2), ("GAST", 0.9)],
    },
    InsurerSeed {
        name: "PremiumCare Health",
        code: "PCH",
        email: "claims@premiumcare.example.com",
        daily_capacity: 120,
        min_batch_size: 8,
        max_batch_size: 40,
        prefers_encounter_date: true,
        efficiency: &[("NEUR", 0.75), ("ONCO", 0.8), ("CARD", 1.1), ("PEDI", 1.15)],
    },
    InsurerSeed {
        name: "Global Health Insurance",
        code: "GHI",
        email: "claims@globalhealth.example.com",
        daily_capacity: 180,
        min_batch_size: 15,
        max_batch_size: 60,
        prefers_encounter_date: false,
        efficiency: &[("DERM", 0.85), ("GAST", 0.8), ("ORTH", 0.9), ("CARD", 1.05)],
    },
];

const PROVIDERS: &[(&str, &str, &str)] = &[
    ("City Medical Center", "CMC", "billing@citymedical.example.com"),
    ("Riverside Health Clinic", "RHC", "claims@riverside.example.com"),
    ("Valley General Hospital", "VGH", "billing@valleygeneral.example.com"),
];

/// Rows created by one seeding run
#[derive(Debug, Default, Clone, PartialEq, Serialize)]
pub struct SeedReport {
    pub specialties: usize,
    pub insurers: usize,
    pub providers: usize,
}

pub async fn seed_reference_data(store: &dyn BatchStore) -> BatchingResult<SeedReport> {
    let mut report = SeedReport::default();
    let mut specialty_ids = HashMap::new();

    for (name, code) in SPECIALTIES {
        let specialty = match store.find_specialty_by_code(code).await? {
            Some(existing) => existing,
            None => {
                report.specialties += 1;
                store
                    .create_specialty(NewSpecialty {
                        name: (*name).to_string(),
                        code: (*code).to_string(),
                    })
                    .await?
            }
        };
        specialty_ids.insert(*code, specialty.id);
    }

    for seed in INSURERS {
        if store.find_insurer_by_code(seed.code).await?.is_some() {
            continue;
        }

        let mut specialty_efficiency = HashMap::new();
        for (code, factor) in seed.efficiency {
            let id = specialty_ids
                .get(code)
                .ok_or_else(|| BatchingError::not_found("Specialty", code))?;
            specialty_efficiency.insert(*id, *factor);
        }

        let insurer = store
            .create_insurer(NewInsurer {
                name: seed.name.to_string(),
                code: seed.code.to_string(),
                email: Some(seed.email.to_string()),
                daily_capacity: Some(seed.daily_capacity),
                min_batch_size: Some(seed.min_batch_size),
                max_batch_size: Some(seed.max_batch_size),
                prefers_encounter_date: Some(seed.prefers_encounter_date),
                specialty_efficiency,
            })
            .await?;
        info!(insurer_id = insurer.id, code = %insurer.code, "Seeded insurer");
        report.insurers += 1;
    }

    for (name, code, email) in PROVIDERS {
        if store.find_provider_by_code(code).await?.is_some() {
            continue;
        }
        let provider = store
            .create_provider(NewProvider {
                name: (*name).to_string(),
                code: (*code).to_string(),
                email: Some((*email).to_string()),
            })
            .await?;
        info!(provider_id = provider.id, code = %provider.code, "Seeded provider");
        report.providers += 1;
    }

    Ok(report)
}
