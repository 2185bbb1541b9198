//! Structured argument graph (SAG) for a completed analysis.
//!
//! The graph is a pure function of the canonical input, the detector results
//! and the verdict. Node ids are derived from semantic content, and nodes and
//! edges are emitted in sorted order, so equal inputs produce byte-identical
//! graphs.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::canonical::CanonicalInput;
use crate::detectors::{DetectorPayload, DetectorResult, EvidenceItem, FallacyItem, Stance};
use crate::pipeline::Verdict;

const SAG_NAMESPACE: &str = "http://failsafe.ai/sag/";
const RDF_TYPE: &str = "http://www.w3.org/1999/02/22-rdf-syntax-ns#type";
const RDFS_LABEL: &str = "http://www.w3.org/2000/01/rdf-schema#label";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeType {
    Claim,
    Assumption,
    Evidence,
    Reasoning,
    Conclusion,
}

impl NodeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeType::Claim => "claim",
            NodeType::Assumption => "assumption",
            NodeType::Evidence => "evidence",
            NodeType::Reasoning => "reasoning",
            NodeType::Conclusion => "conclusion",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Relation {
    Supports,
    Contradicts,
    Implies,
    Assumes,
}

impl Relation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Relation::Supports => "supports",
            Relation::Contradicts => "contradicts",
            Relation::Implies => "implies",
            Relation::Assumes => "assumes",
        }
    }

    /// Relations that must form a DAG.
    pub fn is_inferential(&self) -> bool {
        matches!(self, Relation::Implies | Relation::Assumes)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphNode {
    pub id: String,
    pub node_type: NodeType,
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GraphEdge {
    pub source: String,
    pub target: String,
    pub relation: Relation,
}

/// Structural problems found by [`ArgumentGraph::validate`].
#[derive(Debug, Clone, Error, PartialEq)]
pub enum GraphError {
    #[error("Edge references unknown node {node_id}")]
    DanglingEdge { node_id: String },

    #[error("Cycle in implies/assumes subgraph involving {node_id}")]
    Cycle { node_id: String },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ArgumentGraph {
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<GraphEdge>,
}

fn node_id(node_type: NodeType, parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(node_type.as_str().as_bytes());
    for part in parts {
        hasher.update((part.len() as u64).to_le_bytes());
        hasher.update(part.as_bytes());
    }
    let digest = hex::encode(hasher.finalize());
    format!("{}:{}", node_type.as_str(), &digest[..16])
}

fn evidence_key(item: &EvidenceItem) -> String {
    node_id(
        NodeType::Evidence,
        &[
            item.source.as_str(),
            item.title.as_deref().unwrap_or(""),
            item.snippet.as_deref().unwrap_or(""),
        ],
    )
}

fn fallacy_key(item: &FallacyItem) -> String {
    node_id(
        NodeType::Reasoning,
        &[item.fallacy_type.as_str(), item.span.as_deref().unwrap_or("")],
    )
}

/// Build the argument graph for one analysis.
///
/// A translation result among `results` marks the claim as resting on a
/// translated input and adds an assumption node.
pub fn build(input: &CanonicalInput, results: &[DetectorResult], verdict: Verdict) -> ArgumentGraph {
    let fingerprint = input.fingerprint().to_hex();
    let claim_id = node_id(NodeType::Claim, &[fingerprint.as_str()]);
    let conclusion_id = node_id(NodeType::Conclusion, &[claim_id.as_str(), verdict.as_str()]);

    let mut nodes: BTreeMap<String, GraphNode> = BTreeMap::new();
    let mut edges: BTreeSet<GraphEdge> = BTreeSet::new();
    let mut edge = |source: &str, target: &str, relation: Relation| {
        edges.insert(GraphEdge {
            source: source.to_string(),
            target: target.to_string(),
            relation,
        });
    };

    nodes.insert(
        claim_id.clone(),
        GraphNode {
            id: claim_id.clone(),
            node_type: NodeType::Claim,
            label: input.text().to_string(),
            score: None,
        },
    );

    // Duplicate evidence collapses; the highest-scoring copy decides stance.
    let mut evidence: HashMap<String, &EvidenceItem> = HashMap::new();
    for result in results {
        match &result.payload {
            DetectorPayload::Evidence { items } => {
                for item in items {
                    let key = evidence_key(item);
                    let keep = evidence.get(&key).map_or(true, |existing| {
                        item.score > existing.score
                            || (item.score == existing.score
                                && item.stance.as_str() < existing.stance.as_str())
                    });
                    if keep {
                        evidence.insert(key, item);
                    }
                }
            }
            DetectorPayload::Fallacy { items } => {
                for item in items {
                    let id = fallacy_key(item);
                    edge(&id, &claim_id, Relation::Implies);
                    edge(&id, &conclusion_id, Relation::Implies);
                    let node = nodes.entry(id.clone()).or_insert_with(|| GraphNode {
                        id,
                        node_type: NodeType::Reasoning,
                        label: item.fallacy_type.clone(),
                        score: Some(item.confidence),
                    });
                    if let Some(score) = node.score.as_mut() {
                        *score = score.max(item.confidence);
                    }
                }
            }
            DetectorPayload::Translation(translation) => {
                let id = node_id(
                    NodeType::Assumption,
                    &[
                        "translated",
                        translation.source_language.as_str(),
                        translation.target_language.as_str(),
                    ],
                );
                edge(&id, &claim_id, Relation::Assumes);
                nodes.insert(
                    id.clone(),
                    GraphNode {
                        id,
                        node_type: NodeType::Assumption,
                        label: format!(
                            "translated input from {} to {}",
                            translation.source_language, translation.target_language
                        ),
                        score: Some(result.confidence),
                    },
                );
            }
            DetectorPayload::AiDetection(_) | DetectorPayload::Verification(_) => {}
        }
    }

    for (id, item) in evidence {
        match item.stance {
            Stance::Supports => edge(&id, &claim_id, Relation::Supports),
            Stance::Contradicts => edge(&id, &claim_id, Relation::Contradicts),
            Stance::Neutral => {}
        }
        edge(&id, &conclusion_id, Relation::Implies);
        nodes.insert(
            id.clone(),
            GraphNode {
                id,
                node_type: NodeType::Evidence,
                label: item.title.clone().unwrap_or_else(|| item.source.clone()),
                score: Some(item.score),
            },
        );
    }

    nodes.insert(
        conclusion_id.clone(),
        GraphNode {
            id: conclusion_id,
            node_type: NodeType::Conclusion,
            label: verdict.label().to_string(),
            score: None,
        },
    );

    let mut nodes: Vec<GraphNode> = nodes.into_values().collect();
    nodes.sort_by(|a, b| (a.node_type, &a.id).cmp(&(b.node_type, &b.id)));

    ArgumentGraph {
        nodes,
        edges: edges.into_iter().collect(),
    }
}

fn escape_literal(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            _ => out.push(c),
        }
    }
    out
}

impl ArgumentGraph {
    pub fn node(&self, id: &str) -> Option<&GraphNode> {
        self.nodes.iter().find(|n| n.id == id)
    }

    pub fn nodes_of(&self, node_type: NodeType) -> impl Iterator<Item = &GraphNode> {
        self.nodes.iter().filter(move |n| n.node_type == node_type)
    }

    /// Serde JSON form.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "nodes": self.nodes,
            "edges": self.edges,
        })
    }

    /// Hex SHA-256 of the JSON form.
    pub fn digest(&self) -> String {
        hex::encode(Sha256::digest(self.to_json().to_string().as_bytes()))
    }

    /// N-Triples export under the `http://failsafe.ai/sag/` namespace.
    pub fn to_ntriples(&self) -> String {
        let iri = |id: &str| format!("<{}node/{}>", SAG_NAMESPACE, id);
        let mut out = String::new();
        for node in &self.nodes {
            let subject = iri(&node.id);
            out.push_str(&format!(
                "{} <{}> <{}{}> .\n",
                subject,
                RDF_TYPE,
                SAG_NAMESPACE,
                node.node_type.as_str()
            ));
            out.push_str(&format!(
                "{} <{}> \"{}\" .\n",
                subject,
                RDFS_LABEL,
                escape_literal(&node.label)
            ));
        }
        for edge in &self.edges {
            out.push_str(&format!(
                "{} <{}{}> {} .\n",
                iri(&edge.source),
                SAG_NAMESPACE,
                edge.relation.as_str(),
                iri(&edge.target)
            ));
        }
        out
    }

    /// Check every edge endpoint exists and the implies/assumes subgraph is
    /// acyclic.
    pub fn validate(&self) -> Result<(), GraphError> {
        let ids: BTreeSet<&str> = self.nodes.iter().map(|n| n.id.as_str()).collect();
        for edge in &self.edges {
            for endpoint in [&edge.source, &edge.target] {
                if !ids.contains(endpoint.as_str()) {
                    return Err(GraphError::DanglingEdge {
                        node_id: endpoint.clone(),
                    });
                }
            }
        }

        // Kahn's algorithm over inferential edges
        let mut in_degree: BTreeMap<&str, usize> = ids.iter().map(|id| (*id, 0)).collect();
        let mut outgoing: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
        for edge in self.edges.iter().filter(|e| e.relation.is_inferential()) {
            outgoing
                .entry(edge.source.as_str())
                .or_default()
                .push(edge.target.as_str());
            *in_degree.entry(edge.target.as_str()).or_default() += 1;
        }

        let mut ready: Vec<&str> = in_degree
            .iter()
            .filter(|(_, d)| **d == 0)
            .map(|(id, _)| *id)
            .collect();
        let mut visited = 0;
        while let Some(id) = ready.pop() {
            visited += 1;
            for target in outgoing.get(id).into_iter().flatten() {
                if let Some(degree) = in_degree.get_mut(target) {
                    *degree -= 1;
                    if *degree == 0 {
                        ready.push(*target);
                    }
                }
            }
        }

        if visited == ids.len() {
            Ok(())
        } else {
            let stuck = in_degree
                .into_iter()
                .find(|(_, d)| *d > 0)
                .map(|(id, _)| id.to_string())
                .unwrap_or_default();
            Err(GraphError::Cycle { node_id: stuck })
        }
    }
}
