use chrono::Duration;
use roxmltree::{Document, Node};
use tracing::debug;

use crate::errors::ParseError;
use crate::model::{
    parse_instant, DateRange, ParsedDocument, PriceRecord, SkipReason, SkippedSeries,
};

const PUBLICATION_ROOT: &str = "Publication_MarketDocument";
const ACKNOWLEDGEMENT_ROOT: &str = "Acknowledgement_MarketDocument";
const PUBLICATION_NAMESPACE_PREFIX: &str = "urn:iec62325.351:tc57wg16:451-3:publicationdocument:";
const HOURLY_RESOLUTION: &str = "PT60M";

/// Element lookups scoped to the namespace declared on the document root.
#[derive(Clone, Copy)]
struct Scope<'a> {
    namespace: &'a str,
}

impl<'a> Scope<'a> {
    fn is(&self, node: Node<'_, '_>, name: &str) -> bool {
        node.is_element()
            && node.tag_name().name() == name
            && node.tag_name().namespace() == Some(self.namespace)
    }

    fn child<'d, 'i>(&self, node: Node<'d, 'i>, name: &str) -> Option<Node<'d, 'i>> {
        node.children().find(|child| self.is(*child, name))
    }

    fn children<'d, 'i>(&self, node: Node<'d, 'i>, name: &str) -> Vec<Node<'d, 'i>> {
        node.children()
            .filter(|child| self.is(*child, name))
            .collect()
    }

    fn text<'d>(&self, node: Node<'d, '_>, name: &str) -> Option<&'d str> {
        self.child(node, name)
            .and_then(|child| child.text())
            .map(str::trim)
            .filter(|value| !value.is_empty())
    }
}

/// Parses a day-ahead publication document into hourly price records.
///
/// Each point lands at `period start + (position - 1) hours`. Time-series blocks missing
/// their business type, domains or currency are skipped and listed in
/// [`ParsedDocument::skipped`]; structural problems inside a period abort the document.
/// When `range` is given, records starting outside it are dropped and counted.
pub fn parse_document(
    bytes: &[u8],
    range: Option<&DateRange>,
) -> Result<ParsedDocument, ParseError> {
    let text = std::str::from_utf8(bytes)?;
    let document = Document::parse(text)?;
    let root = document.root_element();
    let root_name = root.tag_name().name();

    if root_name == ACKNOWLEDGEMENT_ROOT {
        return Err(ParseError::Acknowledgement {
            reason: acknowledgement_reason(root),
        });
    }
    if root_name != PUBLICATION_ROOT {
        return Err(ParseError::UnexpectedRoot {
            found: root_name.to_string(),
        });
    }

    let namespace = root.tag_name().namespace().unwrap_or_default();
    if !namespace.starts_with(PUBLICATION_NAMESPACE_PREFIX) {
        return Err(ParseError::Namespace {
            namespace: namespace.to_string(),
        });
    }
    let scope = Scope { namespace };

    let mut records = Vec::new();
    let mut skipped = Vec::new();
    let mut out_of_range = 0usize;

    for (series_index, series) in scope.children(root, "TimeSeries").into_iter().enumerate() {
        let header = match SeriesHeader::read(scope, series) {
            Ok(header) => header,
            Err(reason) => {
                debug!(series_index, %reason, "skipping time series");
                skipped.push(SkippedSeries {
                    series_index,
                    period_index: None,
                    reason,
                });
                continue;
            }
        };

        for (period_index, period) in scope.children(series, "Period").into_iter().enumerate() {
            if let Some(resolution) = scope.text(period, "resolution") {
                if resolution != HOURLY_RESOLUTION {
                    debug!(series_index, period_index, resolution, "skipping non-hourly period");
                    skipped.push(SkippedSeries {
                        series_index,
                        period_index: Some(period_index),
                        reason: SkipReason::UnsupportedResolution,
                    });
                    continue;
                }
            }

            let period_start = read_period_start(scope, period, series_index, period_index)?;
            let points = read_points(scope, period, series_index, period_index)?;

            for (point_index, position, price) in points {
                let start = period_start
                    .checked_add_signed(Duration::hours(i64::from(position) - 1))
                    .ok_or_else(|| ParseError::Point {
                        series_index,
                        period_index,
                        point_index,
                        message: format!("position {position} is out of the representable range"),
                    })?;
                if range.is_some_and(|range| !range.contains(start)) {
                    out_of_range += 1;
                    continue;
                }
                records.push(PriceRecord::new(
                    price,
                    header.business_type,
                    header.in_domain,
                    header.out_domain,
                    header.currency,
                    start,
                ));
            }
        }
    }

    Ok(ParsedDocument {
        namespace: namespace.to_string(),
        records,
        skipped,
        out_of_range,
    })
}

struct SeriesHeader<'d> {
    business_type: &'d str,
    in_domain: &'d str,
    out_domain: &'d str,
    currency: &'d str,
}

impl<'d> SeriesHeader<'d> {
    fn read(scope: Scope<'_>, series: Node<'d, '_>) -> Result<Self, SkipReason> {
        Ok(Self {
            business_type: scope
                .text(series, "businessType")
                .ok_or(SkipReason::MissingBusinessType)?,
            in_domain: scope
                .text(series, "in_Domain.mRID")
                .ok_or(SkipReason::MissingInDomain)?,
            out_domain: scope
                .text(series, "out_Domain.mRID")
                .ok_or(SkipReason::MissingOutDomain)?,
            currency: scope
                .text(series, "currency_Unit.name")
                .ok_or(SkipReason::MissingCurrency)?,
        })
    }
}

fn read_period_start(
    scope: Scope<'_>,
    period: Node<'_, '_>,
    series_index: usize,
    period_index: usize,
) -> Result<chrono::DateTime<chrono::Utc>, ParseError> {
    let raw = scope
        .child(period, "timeInterval")
        .and_then(|interval| scope.text(interval, "start"))
        .ok_or_else(|| ParseError::Period {
            series_index,
            period_index,
            message: "missing timeInterval/start".to_string(),
        })?;
    parse_instant(raw).map_err(|_| ParseError::Period {
        series_index,
        period_index,
        message: format!("invalid period start '{raw}'"),
    })
}

/// Reads `(point index, position, price)` triples ordered by position; positions must be
/// unique and >= 1.
fn read_points(
    scope: Scope<'_>,
    period: Node<'_, '_>,
    series_index: usize,
    period_index: usize,
) -> Result<Vec<(usize, u32, f64)>, ParseError> {
    let point_error = |point_index: usize, message: String| ParseError::Point {
        series_index,
        period_index,
        point_index,
        message,
    };

    let mut points = Vec::new();
    for (point_index, point) in scope.children(period, "Point").into_iter().enumerate() {
        let position_raw = scope
            .text(point, "position")
            .ok_or_else(|| point_error(point_index, "missing position".to_string()))?;
        let position = position_raw
            .parse::<u32>()
            .ok()
            .filter(|position| *position >= 1)
            .ok_or_else(|| point_error(point_index, format!("invalid position '{position_raw}'")))?;

        let price_raw = scope
            .text(point, "price.amount")
            .ok_or_else(|| point_error(point_index, "missing price.amount".to_string()))?;
        let price = price_raw
            .parse::<f64>()
            .map_err(|err| point_error(point_index, format!("invalid price '{price_raw}': {err}")))?;

        points.push((point_index, position, price));
    }

    points.sort_by_key(|(_, position, _)| *position);
    for pair in points.windows(2) {
        if pair[0].1 == pair[1].1 {
            return Err(point_error(
                pair[1].0,
                format!("duplicate position {}", pair[1].1),
            ));
        }
    }

    Ok(points)
}

fn acknowledgement_reason(root: Node<'_, '_>) -> String {
    root.descendants()
        .find(|node| node.is_element() && node.tag_name().name() == "Reason")
        .and_then(|reason| {
            reason
                .children()
                .find(|node| node.is_element() && node.tag_name().name() == "text")
        })
        .and_then(|text| text.text())
        .map(|text| text.trim().to_string())
        .unwrap_or_else(|| "no reason given".to_string())
}
