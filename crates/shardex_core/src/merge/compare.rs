//! Row comparison and group-key encoding for the merge strategies.

use std::cmp::Ordering;

use shardex_common::datum::{decimal_trim, Datum, OwnedRow};

use crate::parsed::{Direction, NullOrdering};

/// One sort key resolved to a column position of the shard cursors.
#[derive(Debug, Clone, Copy)]
pub struct SortKey {
    pub index: usize,
    pub direction: Direction,
    pub nulls: NullOrdering,
}

/// Compare two values under one sort key. NULL placement is independent of
/// the direction.
pub fn compare_values(a: &Datum, b: &Datum, key: &SortKey) -> Ordering {
    match (a.is_null(), b.is_null()) {
        (true, true) => Ordering::Equal,
        (true, false) => match key.nulls {
            NullOrdering::First => Ordering::Less,
            NullOrdering::Last => Ordering::Greater,
        },
        (false, true) => match key.nulls {
            NullOrdering::First => Ordering::Greater,
            NullOrdering::Last => Ordering::Less,
        },
        (false, false) => {
            let ord = a.cmp(b);
            match key.direction {
                Direction::Asc => ord,
                Direction::Desc => ord.reverse(),
            }
        }
    }
}

pub fn compare_rows(a: &OwnedRow, b: &OwnedRow, keys: &[SortKey]) -> Ordering {
    for key in keys {
        let ord = compare_values(
            a.get(key.index).unwrap_or(&Datum::Null),
            b.get(key.index).unwrap_or(&Datum::Null),
            key,
        );
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}

/// Binary group key. Integer widths share one encoding so that `Int32(5)`
/// from one shard groups with `Int64(5)` from another.
pub fn encode_group_key(indices: &[usize], values: &[Datum]) -> Vec<u8> {
    let mut key = Vec::with_capacity(indices.len() * 9);
    for &i in indices {
        match values.get(i).unwrap_or(&Datum::Null) {
            Datum::Null => key.push(0),
            Datum::Boolean(b) => {
                key.push(1);
                key.push(u8::from(*b));
            }
            Datum::Int32(v) => {
                key.push(2);
                key.extend_from_slice(&(*v as i64).to_be_bytes());
            }
            Datum::Int64(v) => {
                key.push(2);
                key.extend_from_slice(&v.to_be_bytes());
            }
            Datum::Float64(v) => {
                key.push(3);
                key.extend_from_slice(&v.to_be_bytes());
            }
            Datum::Decimal(m, s) => {
                let (m, s) = decimal_trim(*m, *s);
                key.push(4);
                key.push(s);
                key.extend_from_slice(&m.to_be_bytes());
            }
            Datum::Text(s) => {
                key.push(5);
                key.extend_from_slice(&(s.len() as u32).to_be_bytes());
                key.extend_from_slice(s.as_bytes());
            }
            Datum::Timestamp(v) => {
                key.push(6);
                key.extend_from_slice(&v.to_be_bytes());
            }
            Datum::Date(v) => {
                key.push(7);
                key.extend_from_slice(&v.to_be_bytes());
            }
            Datum::Bytea(bytes) => {
                key.push(8);
                key.extend_from_slice(&(bytes.len() as u32).to_be_bytes());
                key.extend_from_slice(bytes);
            }
        }
    }
    key
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(direction: Direction, nulls: NullOrdering) -> SortKey {
        SortKey {
            index: 0,
            direction,
            nulls,
        }
    }

    #[test]
    fn test_desc_reverses_values_not_nulls() {
        let k = key(Direction::Desc, NullOrdering::Last);
        assert_eq!(
            compare_values(&Datum::Int64(1), &Datum::Int64(2), &k),
            Ordering::Greater
        );
        assert_eq!(
            compare_values(&Datum::Null, &Datum::Int64(2), &k),
            Ordering::Greater
        );
        let k = key(Direction::Asc, NullOrdering::First);
        assert_eq!(compare_values(&Datum::Null, &Datum::Int64(2), &k), Ordering::Less);
    }

    #[test]
    fn test_compare_rows_uses_later_keys_on_ties() {
        let keys = [
            SortKey {
                index: 0,
                direction: Direction::Asc,
                nulls: NullOrdering::First,
            },
            SortKey {
                index: 1,
                direction: Direction::Desc,
                nulls: NullOrdering::Last,
            },
        ];
        let a = OwnedRow::new(vec![Datum::Int64(1), Datum::from("b")]);
        let b = OwnedRow::new(vec![Datum::Int64(1), Datum::from("a")]);
        assert_eq!(compare_rows(&a, &b, &keys), Ordering::Less);
    }

    #[test]
    fn test_group_key_normalises_integer_width() {
        assert_eq!(
            encode_group_key(&[0], &[Datum::Int32(5)]),
            encode_group_key(&[0], &[Datum::Int64(5)])
        );
        assert_ne!(
            encode_group_key(&[0, 1], &[Datum::from("a"), Datum::from("bc")]),
            encode_group_key(&[0, 1], &[Datum::from("ab"), Datum::from("c")])
        );
    }

    #[test]
    fn test_group_key_ignores_decimal_trailing_zeros() {
        assert_eq!(
            encode_group_key(&[0], &[Datum::Decimal(10, 1)]),
            encode_group_key(&[0], &[Datum::Decimal(1, 0)])
        );
        assert_ne!(
            encode_group_key(&[0], &[Datum::Decimal(11, 1)]),
            encode_group_key(&[0], &[Datum::Decimal(1, 0)])
        );
    }
}
