//! Linear execution order of a task's sources.

use crate::error::CompileError;
use crate::model::SourceMap;

/// Order the sources of `sources`.
///
/// An explicit order wins over computed layers, which win over insertion
/// order. Whatever the origin, the result names every source exactly once or
/// the call fails with [`CompileError::IncompleteOrDivergentOrder`]. The
/// returned error carries no scope; callers attach it.
pub fn sequence(
    sources: &SourceMap,
    explicit_order: Option<&[String]>,
    dependency_layers: Option<&[Vec<String>]>,
) -> Result<Vec<String>, CompileError> {
    if sources.is_empty() {
        return Ok(Vec::new());
    }

    if let Some(order) = explicit_order {
        check_complete(sources, order)?;
        let mut ordered: Vec<(usize, String)> = sources
            .iter()
            .map(|source| {
                let rank = order
                    .iter()
                    .position(|name| name.eq_ignore_ascii_case(&source.name))
                    .unwrap_or(usize::MAX);
                (rank, source.name.clone())
            })
            .collect();
        ordered.sort_by_key(|(rank, _)| *rank);
        return Ok(ordered.into_iter().map(|(_, name)| name).collect());
    }

    if let Some(layers) = dependency_layers {
        let mut flattened = Vec::with_capacity(sources.len());
        for layer in layers {
            // Inside a layer, insertion order of the task decides.
            let mut members: Vec<(usize, &String)> = layer
                .iter()
                .map(|name| (sources.position(name).unwrap_or(usize::MAX), name))
                .collect();
            members.sort_by_key(|(position, _)| *position);
            flattened.extend(members.into_iter().map(|(_, name)| name.clone()));
        }
        check_complete(sources, &flattened)?;
        return Ok(canonical_names(sources, &flattened));
    }

    Ok(sources.names())
}

/// `order` must name each source of `sources` exactly once.
fn check_complete(sources: &SourceMap, order: &[String]) -> Result<(), CompileError> {
    let mut seen: Vec<String> = Vec::with_capacity(order.len());
    let mut extra = Vec::new();
    for name in order {
        let lower = name.to_lowercase();
        if !sources.contains(name) || seen.contains(&lower) {
            extra.push(name.clone());
        } else {
            seen.push(lower);
        }
    }
    let missing: Vec<String> = sources
        .iter()
        .filter(|source| !seen.contains(&source.name.to_lowercase()))
        .map(|source| source.name.clone())
        .collect();

    if order.len() != sources.len() || !missing.is_empty() || !extra.is_empty() {
        return Err(CompileError::IncompleteOrDivergentOrder {
            scope: String::new(),
            missing,
            extra,
        });
    }
    Ok(())
}

/// Spell names the way the task does.
fn canonical_names(sources: &SourceMap, order: &[String]) -> Vec<String> {
    order
        .iter()
        .map(|name| {
            sources
                .get(name)
                .map(|source| source.name.clone())
                .unwrap_or_else(|| name.clone())
        })
        .collect()
}
