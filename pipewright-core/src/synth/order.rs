use std::collections::HashMap;

use crate::error::BuildError;
use crate::ir::{Creator, FrameGraph, FrameId, ScopeId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    White,
    Grey,
    Black,
}

/// Emission order for the frames of one scope.
///
/// Frames keep their insertion order except that every frame is preceded by the
/// same-scope frames it depends on. Dependencies of nested frames count as
/// dependencies of the enclosing frame.
pub(crate) fn order_scope(graph: &FrameGraph, scope: ScopeId) -> Result<Vec<FrameId>, BuildError> {
    let frames = &graph.scope(scope).frames;
    let index: HashMap<FrameId, usize> = frames.iter().enumerate().map(|(i, f)| (*f, i)).collect();

    let deps: Vec<Vec<usize>> = frames
        .iter()
        .map(|f| {
            let mut d: Vec<usize> = Vec::new();
            for var in lifted_bindings(graph, *f) {
                let Creator::Frame(producer) = graph.variable(var).creator else {
                    continue;
                };
                let Some(enclosing) = graph.enclosing_frame_in(producer, scope) else {
                    continue;
                };
                if enclosing == *f {
                    continue;
                }
                if let Some(i) = index.get(&enclosing) {
                    if !d.contains(i) {
                        d.push(*i);
                    }
                }
            }
            d.sort_unstable();
            d
        })
        .collect();

    let mut marks = vec![Mark::White; frames.len()];
    let mut out = Vec::with_capacity(frames.len());
    for start in 0..frames.len() {
        if marks[start] != Mark::White {
            continue;
        }
        marks[start] = Mark::Grey;
        let mut stack: Vec<(usize, usize)> = vec![(start, 0)];
        while let Some(&(node, next)) = stack.last() {
            if next < deps[node].len() {
                if let Some(top) = stack.last_mut() {
                    top.1 += 1;
                }
                let dep = deps[node][next];
                match marks[dep] {
                    Mark::White => {
                        marks[dep] = Mark::Grey;
                        stack.push((dep, 0));
                    }
                    Mark::Grey => {
                        let from = stack.iter().position(|(n, _)| *n == dep).unwrap_or(0);
                        let mut chain: Vec<String> = stack[from..]
                            .iter()
                            .map(|(n, _)| graph.frame(frames[*n]).display())
                            .collect();
                        chain.push(graph.frame(frames[dep]).display());
                        return Err(BuildError::CyclicDependency { chain });
                    }
                    Mark::Black => {}
                }
            } else {
                marks[node] = Mark::Black;
                out.push(frames[node]);
                stack.pop();
            }
        }
    }
    Ok(out)
}

/// Bindings of `frame` and of every frame nested inside it.
fn lifted_bindings(graph: &FrameGraph, frame: FrameId) -> Vec<crate::ir::VarId> {
    let mut out = Vec::new();
    let mut pending = vec![frame];
    while let Some(f) = pending.pop() {
        let fr = graph.frame(f);
        out.extend(fr.bindings.values().copied());
        for child in fr.child_scopes() {
            pending.extend(graph.scope(child).frames.iter().copied());
        }
    }
    out
}
