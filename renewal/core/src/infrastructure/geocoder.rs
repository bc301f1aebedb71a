// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Geocoder adapters
//!
//! - **NominatimGeocoder** - OpenStreetMap Nominatim search API over HTTP
//! - **StaticGeocoder** - fixed lookup table for offline deployments and tests

use anyhow::Context;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

use crate::domain::config::GeocoderConfig;
use crate::domain::device::Coordinates;
use crate::domain::gateway::{CollaboratorError, Geocoder};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

pub struct NominatimGeocoder {
    base_url: String,
    client: Client,
}

#[derive(Debug, Deserialize)]
struct NominatimPlace {
    lat: String,
    lon: String,
}

impl NominatimGeocoder {
    pub fn new(config: &GeocoderConfig) -> anyhow::Result<Self> {
        let client = Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("Failed to build geocoder HTTP client")?;
        Ok(Self {
            base_url: config.endpoint.trim_end_matches('/').to_string(),
            client,
        })
    }
}

#[async_trait]
impl Geocoder for NominatimGeocoder {
    async fn geocode(&self, query: &str) -> Result<Option<Coordinates>, CollaboratorError> {
        let response = self
            .client
            .get(format!("{}/search", self.base_url))
            .query(&[("format", "json"), ("limit", "1"), ("q", query)])
            .send()
            .await
            .map_err(|e| CollaboratorError::Transient(e.to_string()))?;

        let status = response.status();
        if status.is_server_error() || status.as_u16() == 429 {
            return Err(CollaboratorError::Transient(format!("geocoder returned {}", status)));
        }
        if !status.is_success() {
            return Err(CollaboratorError::Rejected(format!("geocoder returned {}", status)));
        }

        let places: Vec<NominatimPlace> = response
            .json()
            .await
            .map_err(|e| CollaboratorError::Rejected(format!("malformed geocoder response: {}", e)))?;

        let Some(place) = places.into_iter().next() else {
            return Ok(None);
        };
        let latitude = place.lat.parse::<f64>();
        let longitude = place.lon.parse::<f64>();
        match (latitude, longitude) {
            (Ok(latitude), Ok(longitude)) => Ok(Some(Coordinates { latitude, longitude })),
            _ => Err(CollaboratorError::Rejected(format!(
                "unparseable coordinates '{}', '{}'",
                place.lat, place.lon
            ))),
        }
    }
}

/// Case-insensitive lookup table
#[derive(Debug, Clone, Default)]
pub struct StaticGeocoder {
    places: HashMap<String, Coordinates>,
}

impl StaticGeocoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_place(mut self, name: &str, coordinates: Coordinates) -> Self {
        self.places.insert(name.to_lowercase(), coordinates);
        self
    }
}

#[async_trait]
impl Geocoder for StaticGeocoder {
    async fn geocode(&self, query: &str) -> Result<Option<Coordinates>, CollaboratorError> {
        Ok(self.places.get(&query.trim().to_lowercase()).copied())
    }
}
