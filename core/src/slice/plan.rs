use std::collections::HashMap;

use crate::{
    common::IndexRange,
    crds::{Centering, CoordinateError, Coordinates},
};

use super::{ResolvedAxis, SliceError, SliceItem, Token};

/// One output axis of a planned selection, before any coordinate lookup.
#[derive(Debug, Clone, PartialEq)]
pub enum Planned {
    /// A source axis and what was asked of it. `None` keeps it whole.
    Source { axis: String, item: Option<SliceItem> },
    New { name: String },
}

/// Maps the tokens of a selection onto `axes`.
///
/// Named tokens claim their axis, bare tokens take the remaining axes in
/// order and an ellipsis absorbs however many are left over. New axes are
/// placed after the axis consumed just before them.
pub fn plan(tokens: &[Token], axes: &[&str]) -> Result<Vec<Planned>, SliceError> {
    let mut ellipsis = tokens.iter().filter(|t| t.item == SliceItem::Ellipsis);
    if let (Some(_), Some(second)) = (ellipsis.next(), ellipsis.next()) {
        return Err(SliceError::MultipleEllipsis { span: second.span });
    }
    let has_ellipsis = tokens.iter().any(|t| t.item == SliceItem::Ellipsis);

    let mut named: HashMap<&str, usize> = HashMap::new();
    for t in tokens {
        let Some(name) = t.name.as_deref() else {
            continue;
        };
        match t.item {
            SliceItem::NewAxis => continue,
            SliceItem::Ellipsis => {
                return Err(SliceError::NamedEllipsis {
                    name: name.to_string(),
                    span: t.span,
                })
            }
            _ => {}
        }
        let Some(i) = axes.iter().position(|a| *a == name) else {
            return Err(CoordinateError::UnknownAxis {
                axis: name.to_string(),
                available: axes.join(", "),
            }
            .into());
        };
        if named.insert(name, i).is_some() {
            return Err(SliceError::DuplicateName {
                name: name.to_string(),
                span: t.span,
            });
        }
    }

    let available: Vec<usize> = (0..axes.len()).filter(|i| !named.values().any(|n| n == i)).collect();
    let positional = tokens
        .iter()
        .filter(|t| t.name.is_none() && t.item.consumes_axis())
        .count();
    if positional > available.len() {
        return Err(SliceError::TooManyTokens {
            tokens: positional + named.len(),
            axes: axes.len(),
        });
    }
    let absorbed = if has_ellipsis { available.len() - positional } else { 0 };

    let mut items: Vec<Option<SliceItem>> = vec![None; axes.len()];
    // new axes anchored after a source axis, `None` is the front
    let mut anchored: Vec<(Option<usize>, String)> = Vec::new();
    let mut next_available = available.iter().copied();
    let mut last: Option<usize> = None;
    let mut unnamed_new = 0;
    let taken = |name: &str, anchored: &[(Option<usize>, String)]| {
        axes.contains(&name) || anchored.iter().any(|(_, n)| n == name)
    };

    // named new axes claim their names before any are synthesized
    for t in tokens.iter().filter(|t| t.item == SliceItem::NewAxis) {
        let Some(name) = t.name.as_deref() else {
            continue;
        };
        let claimed = tokens
            .iter()
            .filter(|o| o.item == SliceItem::NewAxis && o.name.as_deref() == Some(name))
            .count();
        if axes.contains(&name) || claimed > 1 {
            return Err(SliceError::DuplicateName {
                name: name.to_string(),
                span: t.span,
            });
        }
    }
    let named_new: Vec<&str> = tokens
        .iter()
        .filter(|t| t.item == SliceItem::NewAxis)
        .filter_map(|t| t.name.as_deref())
        .collect();

    for t in tokens {
        match (&t.name, t.item) {
            (name, SliceItem::NewAxis) => {
                let name = match name {
                    Some(name) => name.clone(),
                    None => loop {
                        let candidate = format!("new-x{unnamed_new}");
                        unnamed_new += 1;
                        if !taken(&candidate, &anchored) && !named_new.contains(&candidate.as_str()) {
                            break candidate;
                        }
                    },
                };
                anchored.push((last, name));
            }
            (_, SliceItem::Ellipsis) => {
                for _ in 0..absorbed {
                    last = next_available.next().or(last);
                }
            }
            (Some(name), item) => {
                let i = named[name.as_str()];
                items[i] = Some(item);
                last = Some(i);
            }
            (None, item) => {
                if let Some(i) = next_available.next() {
                    items[i] = Some(item);
                    last = Some(i);
                }
            }
        }
    }

    let new_after = |anchor: Option<usize>| {
        anchored
            .iter()
            .filter(move |(a, _)| *a == anchor)
            .map(|(_, name)| Planned::New { name: name.clone() })
    };
    let mut out: Vec<Planned> = new_after(None).collect();
    for (i, axis) in axes.iter().enumerate() {
        out.push(Planned::Source {
            axis: axis.to_string(),
            item: items[i],
        });
        out.extend(new_after(Some(i)));
    }
    Ok(out)
}

/// Turns a plan into concrete index ranges over `crds`.
pub fn resolve(
    planned: &[Planned],
    crds: &Coordinates,
    centering: Centering,
    keep: bool,
) -> Result<Vec<ResolvedAxis>, SliceError> {
    planned
        .iter()
        .map(|p| {
            Ok(match p {
                Planned::New { name } => ResolvedAxis::NewAxis { name: name.clone() },
                Planned::Source { axis, item } => {
                    let n = crds.axis(axis)?.len(centering);
                    match item {
                        None | Some(SliceItem::Ellipsis) | Some(SliceItem::NewAxis) => ResolvedAxis::Keep {
                            axis: axis.clone(),
                            range: IndexRange::full(n),
                        },
                        Some(SliceItem::Value(v)) => {
                            let index = crds.index_for(axis, *v, centering)?;
                            if keep {
                                ResolvedAxis::Keep {
                                    axis: axis.clone(),
                                    range: IndexRange::single(index),
                                }
                            } else {
                                ResolvedAxis::Drop {
                                    axis: axis.clone(),
                                    index,
                                }
                            }
                        }
                        Some(SliceItem::Range { start, stop, step }) => ResolvedAxis::Keep {
                            axis: axis.clone(),
                            range: crds.range_for(axis, *start, *stop, *step, centering)?,
                        },
                    }
                }
            })
        })
        .collect()
}
