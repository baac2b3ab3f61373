//! Page selections
//!
//! A selection is a sorted list of disjoint, non-adjacent inclusive ranges.
//! `0-2`, `0,1,2` and `2,0-1` all normalize to the single range `0..=2`, so
//! they produce the same configuration key. Indices are capped at
//! [`MAX_PAGE_INDEX`]; nothing ever expands a range into individual pages
//! beyond the document's real page count.

use std::fmt;

use serde_json::Value;

/// Highest zero-based page index a request may name
pub const MAX_PAGE_INDEX: usize = 99_999;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageSelection(Vec<(usize, usize)>);

impl PageSelection {
    /// Normalize inclusive `(start, end)` ranges
    pub fn from_ranges(ranges: impl IntoIterator<Item = (usize, usize)>) -> Result<Self, String> {
        let mut ranges: Vec<(usize, usize)> = ranges.into_iter().collect();
        for &(start, end) in &ranges {
            if start > end {
                return Err(format!("page range {}-{} is reversed", start, end));
            }
            if end > MAX_PAGE_INDEX {
                return Err(format!(
                    "page index {} exceeds the maximum of {}",
                    end, MAX_PAGE_INDEX
                ));
            }
        }
        if ranges.is_empty() {
            return Err("no pages selected".to_string());
        }

        ranges.sort_unstable();
        let mut merged: Vec<(usize, usize)> = Vec::with_capacity(ranges.len());
        for (start, end) in ranges {
            match merged.last_mut() {
                Some(last) if start <= last.1 + 1 => last.1 = last.1.max(end),
                _ => merged.push((start, end)),
            }
        }
        Ok(Self(merged))
    }

    /// Parse a selection such as `0,5-10,20`
    pub fn parse(raw: &str) -> Result<Self, String> {
        let invalid = |part: &str| format!("Invalid page range '{}': bad segment '{}'", raw, part);
        let mut ranges: Vec<(usize, usize)> = Vec::new();

        for part in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let range = match part.split_once('-') {
                Some((start, end)) => (
                    start.trim().parse().map_err(|_| invalid(part))?,
                    end.trim().parse().map_err(|_| invalid(part))?,
                ),
                None => {
                    let page = part.parse().map_err(|_| invalid(part))?;
                    (page, page)
                }
            };
            ranges.push(range);
        }

        Self::from_ranges(ranges).map_err(|e| format!("Invalid page range '{}': {}", raw, e))
    }

    pub fn ranges(&self) -> &[(usize, usize)] {
        &self.0
    }

    /// Inclusive first/last page
    pub fn bounds(&self) -> (usize, usize) {
        // Non-empty by construction
        let first = self.0.first().map_or(0, |r| r.0);
        let last = self.0.last().map_or(0, |r| r.1);
        (first, last)
    }

    pub fn is_contiguous(&self) -> bool {
        self.0.len() == 1
    }

    pub fn contains(&self, page: usize) -> bool {
        self.0.iter().any(|&(start, end)| (start..=end).contains(&page))
    }

    /// Number of selected pages
    pub fn len(&self) -> usize {
        self.0.iter().map(|(start, end)| end - start + 1).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Selected pages that exist in a document of `page_count` pages
    pub fn pages_within(&self, page_count: usize) -> impl Iterator<Item = usize> + '_ {
        self.0
            .iter()
            .take_while(move |(start, _)| *start < page_count)
            .flat_map(move |&(start, end)| start..=end.min(page_count.saturating_sub(1)))
    }

    /// Configuration value: single pages as integers, ranges as `[start, end]`
    pub fn to_value(&self) -> Value {
        Value::Array(
            self.0
                .iter()
                .map(|&(start, end)| {
                    if start == end {
                        Value::from(start)
                    } else {
                        Value::from(vec![start, end])
                    }
                })
                .collect(),
        )
    }

    pub fn from_value(value: &Value) -> Result<Self, String> {
        let index = |v: &Value| {
            v.as_u64()
                .and_then(|p| usize::try_from(p).ok())
                .ok_or_else(|| format!("Invalid page index: {}", v))
        };

        let items = value
            .as_array()
            .ok_or_else(|| format!("Invalid pages value: {}", value))?;
        let ranges = items
            .iter()
            .map(|item| match item {
                Value::Array(pair) if pair.len() == 2 => Ok((index(&pair[0])?, index(&pair[1])?)),
                other => index(other).map(|p| (p, p)),
            })
            .collect::<Result<Vec<_>, String>>()?;
        Self::from_ranges(ranges)
    }
}

impl fmt::Display for PageSelection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, &(start, end)) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            if start == end {
                write!(f, "{}", start)?;
            } else {
                write!(f, "{}-{}", start, end)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_merges_ranges() {
        let selection = PageSelection::parse("20, 5-7,0,8").unwrap();
        assert_eq!(selection.ranges(), &[(0, 0), (5, 8), (20, 20)]);
        assert_eq!(selection.to_string(), "0,5-8,20");
        assert_eq!(selection.len(), 6);
        assert_eq!(selection.bounds(), (0, 20));
        assert!(!selection.is_contiguous());
        assert!(selection.contains(6) && !selection.contains(9));

        assert_eq!(PageSelection::parse("0,1,2"), PageSelection::parse("2,0-1"));
        assert!(PageSelection::parse("0-2").unwrap().is_contiguous());
    }

    #[test]
    fn test_parse_rejects_bad_input() {
        assert!(PageSelection::parse("7-5").is_err());
        assert!(PageSelection::parse("a").is_err());
        assert!(PageSelection::parse(" , ").is_err());
        assert!(PageSelection::parse("1-2-3").is_err());
    }

    #[test]
    fn test_huge_indices_are_rejected_without_expanding() {
        let max = usize::MAX.to_string();
        let err = PageSelection::parse(&format!("0-{}", max)).unwrap_err();
        assert!(err.contains("exceeds the maximum"), "{}", err);

        assert!(PageSelection::parse("0-50000000").is_err());
        assert!(PageSelection::from_ranges([(0, MAX_PAGE_INDEX + 1)]).is_err());

        let widest = PageSelection::from_ranges([(0, MAX_PAGE_INDEX)]).unwrap();
        assert_eq!(widest.ranges().len(), 1);
        assert_eq!(widest.to_value(), json!([[0, MAX_PAGE_INDEX]]));
    }

    #[test]
    fn test_pages_within_document() {
        let selection = PageSelection::parse("1-3,8,10-12").unwrap();
        assert_eq!(selection.pages_within(11).collect::<Vec<_>>(), vec![1, 2, 3, 8, 10]);
        assert_eq!(selection.pages_within(0).count(), 0);

        let widest = PageSelection::from_ranges([(0, MAX_PAGE_INDEX)]).unwrap();
        assert_eq!(widest.pages_within(4).collect::<Vec<_>>(), vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_value_form() {
        let selection = PageSelection::parse("0,5-7").unwrap();
        assert_eq!(selection.to_value(), json!([0, [5, 7]]));
        assert_eq!(PageSelection::from_value(&selection.to_value()).unwrap(), selection);

        let legacy = PageSelection::from_value(&json!([4, 1, 2])).unwrap();
        assert_eq!(legacy.ranges(), &[(1, 2), (4, 4)]);

        assert!(PageSelection::from_value(&json!("0-3")).is_err());
        assert!(PageSelection::from_value(&json!([-1])).is_err());
        assert!(PageSelection::from_value(&json!([[0, 1, 2]])).is_err());
    }
}
