#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::VecDeque;

use chrono::{DateTime, Duration, TimeZone, Utc};
use nepp_core::fetch::{FetchError, FetchWindow, Fetcher};
use nepp_core::AreaCode;
use nepp_parser::PriceRecord;

pub const NAMESPACE: &str = "urn:iec62325.351:tc57wg16:451-3:publicationdocument:7:0";

pub fn utc(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap()
}

pub fn record(start: DateTime<Utc>, price: f64) -> PriceRecord {
    PriceRecord::new(price, "A62", "10YNO-1--------2", "10YNO-1--------2", "EUR", start)
}

/// Hourly records starting at `start` with prices `base, base + 1, ...`.
pub fn hourly(start: DateTime<Utc>, count: usize, base: f64) -> Vec<PriceRecord> {
    (0..count)
        .map(|i| record(start + Duration::hours(i as i64), base + i as f64))
        .collect()
}

/// A single-series publication document for `area` with hourly points from `start`.
pub fn price_document(area: AreaCode, start: DateTime<Utc>, prices: &[f64]) -> Vec<u8> {
    let points: String = prices
        .iter()
        .enumerate()
        .map(|(idx, price)| {
            format!(
                "<Point><position>{}</position><price.amount>{}</price.amount></Point>",
                idx + 1,
                price
            )
        })
        .collect();
    let end = start + Duration::hours(prices.len() as i64);
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<Publication_MarketDocument xmlns="{NAMESPACE}">
  <mRID>test</mRID>
  <type>A44</type>
  <TimeSeries>
    <mRID>1</mRID>
    <businessType>A62</businessType>
    <in_Domain.mRID codingScheme="A01">{eic}</in_Domain.mRID>
    <out_Domain.mRID codingScheme="A01">{eic}</out_Domain.mRID>
    <currency_Unit.name>EUR</currency_Unit.name>
    <price_Measure_Unit.name>MWH</price_Measure_Unit.name>
    <curveType>A01</curveType>
    <Period>
      <timeInterval>
        <start>{start}</start>
        <end>{end}</end>
      </timeInterval>
      <resolution>PT60M</resolution>
      {points}
    </Period>
  </TimeSeries>
</Publication_MarketDocument>
"#,
        eic = area.eic(),
        start = start.format("%Y-%m-%dT%H:%MZ"),
        end = end.format("%Y-%m-%dT%H:%MZ"),
    )
    .into_bytes()
}

pub fn acknowledgement_document() -> Vec<u8> {
    br#"<?xml version="1.0" encoding="UTF-8"?>
<Acknowledgement_MarketDocument xmlns="urn:iec62325.351:tc57wg16:451-1:acknowledgementdocument:7:0">
  <Reason>
    <code>999</code>
    <text>No matching data found for Data item Day-ahead Prices</text>
  </Reason>
</Acknowledgement_MarketDocument>
"#
    .to_vec()
}

/// Fetcher that answers every window with a document covering it, with a price per hour.
pub struct WindowFetcher {
    pub base_price: f64,
    pub calls: RefCell<Vec<FetchWindow>>,
}

impl WindowFetcher {
    pub fn new(base_price: f64) -> Self {
        Self {
            base_price,
            calls: RefCell::new(Vec::new()),
        }
    }
}

impl Fetcher for WindowFetcher {
    fn fetch(&self, area: AreaCode, window: &FetchWindow) -> Result<Vec<u8>, FetchError> {
        self.calls.borrow_mut().push(*window);
        let hours = (window.end - window.start).num_hours() as usize;
        let prices: Vec<f64> = (0..hours).map(|i| self.base_price + (i % 24) as f64).collect();
        Ok(price_document(area, window.start, &prices))
    }
}

/// Fetcher replaying a fixed script of responses, one per call.
pub struct ScriptedFetcher {
    responses: RefCell<VecDeque<Result<Vec<u8>, FetchError>>>,
    pub calls: RefCell<usize>,
}

impl ScriptedFetcher {
    pub fn new(responses: Vec<Result<Vec<u8>, FetchError>>) -> Self {
        Self {
            responses: RefCell::new(responses.into()),
            calls: RefCell::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        *self.calls.borrow()
    }
}

impl Fetcher for ScriptedFetcher {
    fn fetch(&self, _area: AreaCode, _window: &FetchWindow) -> Result<Vec<u8>, FetchError> {
        *self.calls.borrow_mut() += 1;
        self.responses
            .borrow_mut()
            .pop_front()
            .unwrap_or_else(|| Err(FetchError::Transport("script exhausted".to_string())))
    }
}
