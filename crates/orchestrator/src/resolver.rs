//! Dependency resolution and execution planning.
//!
//! Detects ordering constraints from three sources (action-pair rules,
//! semantic markers in the conversation, shared critical entities),
//! breaks cycles by dropping the weakest edge, and decomposes the DAG
//! into topological levels.

use std::collections::{HashMap, HashSet};

use mando_domain::error::{Error, Result};
use mando_domain::subtask::{ExecutionPlan, Subtask};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Edges
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One detected ordering constraint: `from` depends on `to`.
#[derive(Debug, Clone, PartialEq)]
struct Edge {
    from: String,
    to: String,
    confidence: f64,
}

const RULE_CONFIDENCE: f64 = 0.9;
const SHARED_ENTITY_CONFIDENCE: f64 = 0.7;
const SEMANTIC_CONFIDENCE: f64 = 0.6;

/// Ordering markers that imply the subtasks happen in utterance order.
const ORDERING_MARKERS: [&str; 4] = ["después de", "una vez que", "luego", "primero"];

/// Entity names whose shared values order two subtasks.
const CRITICAL_ENTITIES: [&str; 8] = [
    "lugar",
    "ubicacion",
    "location",
    "persona",
    "user",
    "resource",
    "file",
    "session",
];

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Resolver
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct DependencyResolver {
    /// Action-pair table: (dependent action, prerequisite action).
    rules: Vec<(String, String)>,
}

impl Default for DependencyResolver {
    fn default() -> Self {
        Self::new(vec![
            ("asignar_issue".into(), "crear_github_issue".into()),
            ("comentar_issue".into(), "crear_github_issue".into()),
            ("cerrar_issue".into(), "crear_github_issue".into()),
            (
                "programar_alarma_condicional".into(),
                "consultar_tiempo".into(),
            ),
        ])
    }
}

impl DependencyResolver {
    pub fn new(rules: Vec<(String, String)>) -> Self {
        Self { rules }
    }

    /// Build the execution plan for a validated batch.
    ///
    /// `history` is recent conversation text scanned for ordering
    /// markers. Explicit dependencies already on the subtasks are kept
    /// (confidence 1.0, never dropped by cycle mitigation ahead of
    /// detected edges).
    pub fn resolve(&self, subtasks: Vec<Subtask>, history: &[String]) -> Result<ExecutionPlan> {
        let ids: HashSet<String> = subtasks.iter().map(|s| s.subtask_id.clone()).collect();

        let mut edges: Vec<Edge> = Vec::new();

        // Explicit dependencies from decomposition.
        for subtask in &subtasks {
            for dep in &subtask.dependencies {
                if ids.contains(dep) {
                    push_edge(
                        &mut edges,
                        Edge {
                            from: subtask.subtask_id.clone(),
                            to: dep.clone(),
                            confidence: 1.0,
                        },
                    );
                }
            }
        }

        self.rule_edges(&subtasks, &mut edges);
        semantic_edges(&subtasks, history, &mut edges);
        shared_entity_edges(&subtasks, &mut edges);

        let edges = break_cycles(edges, &subtasks);
        build_levels(subtasks, &edges)
    }

    /// Action-pair table: "A depends on B" whenever both appear.
    fn rule_edges(&self, subtasks: &[Subtask], edges: &mut Vec<Edge>) {
        for (dependent_action, prerequisite_action) in &self.rules {
            for dependent in subtasks.iter().filter(|s| &s.action_id == dependent_action) {
                for prerequisite in subtasks
                    .iter()
                    .filter(|s| &s.action_id == prerequisite_action)
                {
                    push_edge(
                        edges,
                        Edge {
                            from: dependent.subtask_id.clone(),
                            to: prerequisite.subtask_id.clone(),
                            confidence: RULE_CONFIDENCE,
                        },
                    );
                }
            }
        }
    }
}

fn push_edge(edges: &mut Vec<Edge>, edge: Edge) {
    if edge.from == edge.to {
        return;
    }
    match edges
        .iter_mut()
        .find(|e| e.from == edge.from && e.to == edge.to)
    {
        Some(existing) => existing.confidence = existing.confidence.max(edge.confidence),
        None => edges.push(edge),
    }
}

// ── semantic detection ──────────────────────────────────────────────

/// Ordering markers in the conversation imply the subtasks run in
/// declaration order: each subtask depends on its predecessor.
fn semantic_edges(subtasks: &[Subtask], history: &[String], edges: &mut Vec<Edge>) {
    let marker_present = history.iter().any(|text| {
        let lowered = text.to_lowercase();
        ORDERING_MARKERS.iter().any(|m| lowered.contains(m))
    });
    if !marker_present {
        return;
    }

    for pair in subtasks.windows(2) {
        push_edge(
            edges,
            Edge {
                from: pair[1].subtask_id.clone(),
                to: pair[0].subtask_id.clone(),
                confidence: SEMANTIC_CONFIDENCE,
            },
        );
    }
}

// ── shared-entity detection ─────────────────────────────────────────

/// Precedence class of an action, from its verb: authenticate/verify →
/// read/query → process/create → modify/send → notify.
fn precedence_class(action_id: &str) -> u8 {
    let verb = action_id.split('_').next().unwrap_or(action_id);
    match verb {
        "autenticar" | "verificar" | "login" => 0,
        "consultar" | "leer" | "obtener" | "buscar" => 1,
        "crear" | "generar" | "procesar" => 2,
        "modificar" | "actualizar" | "programar" | "enviar" | "poner" | "encender" | "apagar"
        | "reproducir" | "asignar" | "ajustar" => 3,
        "notificar" | "avisar" => 4,
        _ => 2,
    }
}

/// Two subtasks sharing a critical entity value are ordered by action
/// precedence: the later class depends on the earlier one.
fn shared_entity_edges(subtasks: &[Subtask], edges: &mut Vec<Edge>) {
    for (i, a) in subtasks.iter().enumerate() {
        for b in subtasks.iter().skip(i + 1) {
            let shares = CRITICAL_ENTITIES.iter().any(|key| {
                match (a.entities.get(*key), b.entities.get(*key)) {
                    (Some(va), Some(vb)) => va == vb,
                    _ => false,
                }
            });
            if !shares {
                continue;
            }

            let class_a = precedence_class(&a.action_id);
            let class_b = precedence_class(&b.action_id);
            let (dependent, prerequisite) = match class_a.cmp(&class_b) {
                std::cmp::Ordering::Greater => (a, b),
                std::cmp::Ordering::Less => (b, a),
                std::cmp::Ordering::Equal => continue,
            };
            push_edge(
                edges,
                Edge {
                    from: dependent.subtask_id.clone(),
                    to: prerequisite.subtask_id.clone(),
                    confidence: SHARED_ENTITY_CONFIDENCE,
                },
            );
        }
    }
}

// ── cycle mitigation ────────────────────────────────────────────────

/// Find a cycle in the dependency graph, as a list of edges along it.
fn find_cycle(edges: &[Edge], subtasks: &[Subtask]) -> Option<Vec<usize>> {
    let mut adjacency: HashMap<&str, Vec<usize>> = HashMap::new();
    for (index, edge) in edges.iter().enumerate() {
        adjacency.entry(edge.from.as_str()).or_default().push(index);
    }

    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        White,
        Grey,
        Black,
    }
    let mut marks: HashMap<&str, Mark> = subtasks
        .iter()
        .map(|s| (s.subtask_id.as_str(), Mark::White))
        .collect();

    fn dfs<'a>(
        node: &'a str,
        adjacency: &HashMap<&'a str, Vec<usize>>,
        edges: &'a [Edge],
        marks: &mut HashMap<&'a str, Mark>,
        path: &mut Vec<usize>,
    ) -> Option<Vec<usize>> {
        marks.insert(node, Mark::Grey);
        for &edge_index in adjacency.get(node).into_iter().flatten() {
            let next = edges[edge_index].to.as_str();
            match marks.get(next).copied().unwrap_or(Mark::Black) {
                Mark::Grey => {
                    // Found a back edge; the cycle is the path suffix
                    // from `next` plus this edge.
                    let mut cycle = vec![edge_index];
                    for &prior in path.iter().rev() {
                        cycle.push(prior);
                        if edges[prior].from == next {
                            break;
                        }
                    }
                    return Some(cycle);
                }
                Mark::White => {
                    path.push(edge_index);
                    if let Some(cycle) = dfs(next, adjacency, edges, marks, path) {
                        return Some(cycle);
                    }
                    path.pop();
                }
                Mark::Black => {}
            }
        }
        marks.insert(node, Mark::Black);
        None
    }

    let nodes: Vec<&str> = subtasks.iter().map(|s| s.subtask_id.as_str()).collect();
    for node in nodes {
        if marks.get(node) == Some(&Mark::White) {
            let mut path = Vec::new();
            if let Some(cycle) = dfs(node, &adjacency, edges, &mut marks, &mut path) {
                return Some(cycle);
            }
        }
    }
    None
}

/// Iteratively drop the lowest-confidence edge of each detected cycle.
fn break_cycles(mut edges: Vec<Edge>, subtasks: &[Subtask]) -> Vec<Edge> {
    while let Some(cycle) = find_cycle(&edges, subtasks) {
        let &weakest = cycle
            .iter()
            .min_by(|&&a, &&b| {
                edges[a]
                    .confidence
                    .partial_cmp(&edges[b].confidence)
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .expect("cycle has edges");
        let dropped = edges.remove(weakest);
        tracing::debug!(
            from = %dropped.from,
            to = %dropped.to,
            confidence = dropped.confidence,
            "dropping weakest edge to break dependency cycle"
        );
    }
    edges
}

// ── level decomposition ─────────────────────────────────────────────

/// Topological level decomposition: level 0 holds subtasks with no
/// dependencies; level i holds subtasks whose dependencies are all in
/// levels < i. Ties within a level order by priority, then by
/// descending confidence.
fn build_levels(mut subtasks: Vec<Subtask>, edges: &[Edge]) -> Result<ExecutionPlan> {
    // Write the final edge set back onto the subtasks.
    let mut deps: HashMap<&str, HashSet<String>> = HashMap::new();
    for edge in edges {
        deps.entry(edge.from.as_str())
            .or_default()
            .insert(edge.to.clone());
    }
    for subtask in subtasks.iter_mut() {
        subtask.dependencies = deps
            .get(subtask.subtask_id.as_str())
            .cloned()
            .unwrap_or_default();
    }

    let mut placed: HashSet<String> = HashSet::new();
    let mut levels: Vec<Vec<Subtask>> = Vec::new();
    let mut remaining = subtasks;

    while !remaining.is_empty() {
        let (mut ready, rest): (Vec<Subtask>, Vec<Subtask>) = remaining
            .into_iter()
            .partition(|s| s.dependencies.iter().all(|d| placed.contains(d)));

        if ready.is_empty() {
            // A cycle survived mitigation.
            return Err(Error::Invariant(
                "dependency cycle remained after mitigation".into(),
            ));
        }

        ready.sort_by(|a, b| {
            b.priority.cmp(&a.priority).then_with(|| {
                b.confidence
                    .partial_cmp(&a.confidence)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| a.subtask_id.cmp(&b.subtask_id))
            })
        });

        for subtask in &ready {
            placed.insert(subtask.subtask_id.clone());
        }
        levels.push(ready);
        remaining = rest;
    }

    let plan = ExecutionPlan {
        plan_id: uuid::Uuid::new_v4().to_string(),
        levels,
    };
    plan.check()?;
    Ok(plan)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
