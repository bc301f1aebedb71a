// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Plain-text quote renderer
//!
//! Produces an itemised `text/plain` quote document. The layout is stable so
//! identical priced quotes render to identical bytes.

use async_trait::async_trait;
use std::fmt::Write;

use crate::domain::gateway::{CollaboratorError, DocumentRenderer, RenderedDocument};
use crate::domain::quote::{format_minor, PricedQuote};

pub const CONTENT_TYPE: &str = "text/plain; charset=utf-8";

#[derive(Debug, Clone, Copy, Default)]
pub struct PlainTextQuoteRenderer;

impl PlainTextQuoteRenderer {
    pub fn new() -> Self {
        Self
    }

    fn layout(quote: &PricedQuote) -> Result<String, std::fmt::Error> {
        let mut out = String::new();
        writeln!(out, "{}", quote.issuer_name)?;
        writeln!(out, "RENEWAL QUOTE")?;
        writeln!(out, "Client: {}", quote.client_name)?;
        writeln!(out, "Date: {}", quote.priced_at.format("%Y-%m-%d"))?;
        writeln!(out, "Margin: {}%", quote.margin.value())?;
        writeln!(out)?;
        writeln!(out, "{:<24} {:<18} {:>12} {:>12}", "Device", "Serial", "Base", "Total")?;
        for item in &quote.line_items {
            writeln!(
                out,
                "{:<24} {:<18} {:>12} {:>12}",
                item.device_name,
                item.serial_number,
                format_minor(item.base_price_minor),
                format_minor(item.line_total_minor)
            )?;
        }
        writeln!(out)?;
        writeln!(
            out,
            "Grand total: {} {}",
            quote.currency,
            format_minor(quote.grand_total_minor)
        )?;
        Ok(out)
    }
}

#[async_trait]
impl DocumentRenderer for PlainTextQuoteRenderer {
    async fn render(&self, quote: &PricedQuote) -> Result<RenderedDocument, CollaboratorError> {
        let text = Self::layout(quote)
            .map_err(|e| CollaboratorError::Rejected(format!("quote layout failed: {}", e)))?;
        Ok(RenderedDocument {
            content_type: CONTENT_TYPE.to_string(),
            bytes: text.into_bytes(),
        })
    }
}
