//! SQLite storage backend for panelgraph

use super::traits::{
    EdgeFilter, GraphStore, Merged, NodeFilter, OpenStore, StorageError, StorageResult, TxBody,
};
use crate::graph::{
    Edge, EdgeId, Node, NodeId, NodeMetadata, Properties, PropertyValue, SOURCE_PROPERTY,
};
use chrono::{DateTime, Utc};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

/// SQLite-backed graph store
///
/// Uses a single SQLite database file with tables for nodes, edges and
/// declared uniqueness constraints. Thread-safe via internal mutex on the
/// connection; a transaction holds the mutex for its whole body, so
/// concurrent writers are serialised rather than interleaved.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Initialize the database schema
    fn init_schema(conn: &Connection) -> StorageResult<()> {
        conn.execute_batch(
            r#"
            -- Nodes table; `source` mirrors the provenance property for indexed lookups
            CREATE TABLE IF NOT EXISTS nodes (
                id TEXT PRIMARY KEY,
                label TEXT NOT NULL,
                source TEXT,
                properties_json TEXT NOT NULL,
                metadata_json TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_nodes_label ON nodes(label);
            CREATE INDEX IF NOT EXISTS idx_nodes_source ON nodes(source);

            -- Edges table
            CREATE TABLE IF NOT EXISTS edges (
                id TEXT PRIMARY KEY,
                source_id TEXT NOT NULL,
                target_id TEXT NOT NULL,
                relationship TEXT NOT NULL,
                created_at TEXT NOT NULL,
                properties_json TEXT NOT NULL,
                FOREIGN KEY (source_id) REFERENCES nodes(id) ON DELETE CASCADE,
                FOREIGN KEY (target_id) REFERENCES nodes(id) ON DELETE CASCADE
            );

            CREATE INDEX IF NOT EXISTS idx_edges_source ON edges(source_id, relationship);
            CREATE INDEX IF NOT EXISTS idx_edges_target ON edges(target_id, relationship);
            CREATE INDEX IF NOT EXISTS idx_edges_relationship ON edges(relationship);

            -- Declared uniqueness constraints
            CREATE TABLE IF NOT EXISTS constraints (
                label TEXT NOT NULL,
                property TEXT NOT NULL,
                PRIMARY KEY (label, property)
            );

            -- Enable foreign keys
            PRAGMA foreign_keys = ON;

            -- Enable WAL mode for concurrent reads during writes
            PRAGMA journal_mode = WAL;
            "#,
        )?;

        Ok(())
    }

    fn lock(&self) -> StorageResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StorageError::Poisoned)
    }
}

impl OpenStore for SqliteStore {
    fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        Self::init_schema(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn open_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init_schema(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

impl GraphStore for SqliteStore {
    fn ensure_unique(&self, label: &str, property: &str) -> StorageResult<()> {
        let conn = self.lock()?;
        ConnView::new(&conn).ensure_unique(label, property)
    }

    fn create_node(&self, label: &str, properties: &Properties) -> StorageResult<NodeId> {
        let conn = self.lock()?;
        ConnView::new(&conn).create_node(label, properties)
    }

    fn merge_node(
        &self,
        label: &str,
        key: &Properties,
        on_create: &Properties,
    ) -> StorageResult<Merged<NodeId>> {
        let conn = self.lock()?;
        ConnView::new(&conn).merge_node(label, key, on_create)
    }

    fn update_node(&self, id: &NodeId, set: &Properties) -> StorageResult<bool> {
        let conn = self.lock()?;
        ConnView::new(&conn).update_node(id, set)
    }

    fn load_node(&self, id: &NodeId) -> StorageResult<Option<Node>> {
        let conn = self.lock()?;
        ConnView::new(&conn).load_node(id)
    }

    fn find_nodes(&self, filter: &NodeFilter) -> StorageResult<Vec<Node>> {
        let conn = self.lock()?;
        ConnView::new(&conn).find_nodes(filter)
    }

    fn exists(&self, filter: &NodeFilter) -> StorageResult<bool> {
        let conn = self.lock()?;
        ConnView::new(&conn).exists(filter)
    }

    fn remove_node_properties(&self, label: &str, keys: &[&str]) -> StorageResult<()> {
        let conn = self.lock()?;
        ConnView::new(&conn).remove_node_properties(label, keys)
    }

    fn delete_nodes(&self, filter: &NodeFilter) -> StorageResult<usize> {
        let conn = self.lock()?;
        ConnView::new(&conn).delete_nodes(filter)
    }

    fn node_count(&self, label: Option<&str>) -> StorageResult<usize> {
        let conn = self.lock()?;
        ConnView::new(&conn).node_count(label)
    }

    fn create_relationship(
        &self,
        from: &NodeId,
        to: &NodeId,
        relationship: &str,
        properties: &Properties,
    ) -> StorageResult<EdgeId> {
        let conn = self.lock()?;
        ConnView::new(&conn).create_relationship(from, to, relationship, properties)
    }

    fn merge_relationship(
        &self,
        from: &NodeId,
        to: &NodeId,
        relationship: &str,
        on_create: &Properties,
    ) -> StorageResult<Merged<EdgeId>> {
        let conn = self.lock()?;
        ConnView::new(&conn).merge_relationship(from, to, relationship, on_create)
    }

    fn update_relationship(&self, id: &EdgeId, set: &Properties) -> StorageResult<bool> {
        let conn = self.lock()?;
        ConnView::new(&conn).update_relationship(id, set)
    }

    fn edges_from(&self, id: &NodeId, relationship: Option<&str>) -> StorageResult<Vec<Edge>> {
        let conn = self.lock()?;
        ConnView::new(&conn).edges_from(id, relationship)
    }

    fn edges_to(&self, id: &NodeId, relationship: Option<&str>) -> StorageResult<Vec<Edge>> {
        let conn = self.lock()?;
        ConnView::new(&conn).edges_to(id, relationship)
    }

    fn find_edges(&self, filter: &EdgeFilter) -> StorageResult<Vec<Edge>> {
        let conn = self.lock()?;
        ConnView::new(&conn).find_edges(filter)
    }

    fn edge_count(&self, relationship: Option<&str>) -> StorageResult<usize> {
        let conn = self.lock()?;
        ConnView::new(&conn).edge_count(relationship)
    }

    fn transaction(&self, body: &mut TxBody<'_>) -> StorageResult<()> {
        let conn = self.lock()?;
        conn.execute_batch("BEGIN IMMEDIATE")?;

        let view = ConnView { conn: &conn, depth: 1 };
        let tx: &dyn GraphStore = &view;
        match body(tx) {
            Ok(()) => {
                conn.execute_batch("COMMIT")?;
                Ok(())
            }
            Err(e) => {
                if let Err(rollback) = conn.execute_batch("ROLLBACK") {
                    tracing::warn!(error = %rollback, "rollback failed");
                }
                Err(e)
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Connection-bound operations
// ---------------------------------------------------------------------------

/// Store operations over an already-locked connection.
///
/// `SqliteStore` delegates every call here; a transaction hands the same
/// view to its body so nested calls reuse the held connection.
struct ConnView<'c> {
    conn: &'c Connection,
    /// Transaction nesting depth (0 = autocommit)
    depth: usize,
}

const NODE_COLUMNS: &str = "id, label, properties_json, metadata_json";
const EDGE_COLUMNS: &str = "id, source_id, target_id, relationship, created_at, properties_json";

impl<'c> ConnView<'c> {
    fn new(conn: &'c Connection) -> Self {
        Self { conn, depth: 0 }
    }

    /// Reject a write that would duplicate a constrained property value.
    fn check_constraints(&self, label: &str, properties: &Properties) -> StorageResult<()> {
        let mut stmt = self
            .conn
            .prepare_cached("SELECT property FROM constraints WHERE label = ?1")?;
        let constrained: Vec<String> = stmt
            .query_map(params![label], |row| row.get(0))?
            .collect::<Result<_, _>>()?;

        for property in constrained {
            let Some(value) = properties.get(&property) else {
                continue;
            };
            if value.is_empty() {
                continue;
            }
            let taken: bool = self.conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM nodes WHERE label = ?1 AND json_extract(properties_json, ?2) = ?3)",
                params![label, json_path(&property), sql_value(value)?],
                |row| row.get(0),
            )?;
            if taken {
                return Err(StorageError::Constraint {
                    label: label.to_string(),
                    property,
                    value: value.as_text(),
                });
            }
        }
        Ok(())
    }

    fn insert_node(&self, node: &Node) -> StorageResult<()> {
        self.conn.execute(
            "INSERT INTO nodes (id, label, source, properties_json, metadata_json)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                node.id.as_str(),
                node.label,
                node.source(),
                serde_json::to_string(&node.properties)?,
                serde_json::to_string(&node.metadata)?,
            ],
        )?;
        Ok(())
    }

    fn write_node(&self, node: &Node) -> StorageResult<()> {
        self.conn.execute(
            "UPDATE nodes SET source = ?2, properties_json = ?3, metadata_json = ?4 WHERE id = ?1",
            params![
                node.id.as_str(),
                node.source(),
                serde_json::to_string(&node.properties)?,
                serde_json::to_string(&node.metadata)?,
            ],
        )?;
        Ok(())
    }

    fn query_nodes(&self, filter: &NodeFilter) -> StorageResult<Vec<Node>> {
        let (clause, values) = node_where(filter)?;
        let mut sql = format!("SELECT {NODE_COLUMNS} FROM nodes{clause} ORDER BY rowid");
        if let Some(limit) = filter.limit {
            sql.push_str(&format!(" LIMIT {}", limit));
        }

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(values.iter()), |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
            ))
        })?;

        let mut nodes = Vec::new();
        for row in rows {
            let (id, label, properties, metadata) = row?;
            nodes.push(row_to_node(id, label, properties, metadata)?);
        }
        Ok(nodes)
    }

    fn query_edges(&self, filter: &EdgeFilter) -> StorageResult<Vec<Edge>> {
        let mut clauses = Vec::new();
        let mut values: Vec<Value> = Vec::new();
        if let Some(ref relationship) = filter.relationship {
            clauses.push("relationship = ?");
            values.push(Value::Text(relationship.clone()));
        }
        if let Some(ref source) = filter.source {
            clauses.push("source_id = ?");
            values.push(Value::Text(source.as_str().to_string()));
        }
        if let Some(ref target) = filter.target {
            clauses.push("target_id = ?");
            values.push(Value::Text(target.as_str().to_string()));
        }

        let mut sql = format!("SELECT {EDGE_COLUMNS} FROM edges");
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }
        sql.push_str(" ORDER BY rowid");
        if let Some(limit) = filter.limit {
            sql.push_str(&format!(" LIMIT {}", limit));
        }

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(values.iter()), |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, String>(5)?,
            ))
        })?;

        let mut edges = Vec::new();
        for row in rows {
            let (id, source, target, rel, created, props) = row?;
            edges.push(row_to_edge(id, source, target, rel, created, props)?);
        }
        Ok(edges)
    }

    fn load_edge(&self, id: &EdgeId) -> StorageResult<Option<Edge>> {
        let row: Option<(String, String, String, String, String, String)> = self
            .conn
            .query_row(
                &format!("SELECT {EDGE_COLUMNS} FROM edges WHERE id = ?1"),
                params![id.as_str()],
                |row| {
                    Ok((
                        row.get(0)?,
                        row.get(1)?,
                        row.get(2)?,
                        row.get(3)?,
                        row.get(4)?,
                        row.get(5)?,
                    ))
                },
            )
            .optional()?;

        match row {
            Some((id, source, target, rel, created, props)) => {
                Ok(Some(row_to_edge(id, source, target, rel, created, props)?))
            }
            None => Ok(None),
        }
    }

    fn node_exists(&self, id: &NodeId) -> StorageResult<bool> {
        let found: bool = self.conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM nodes WHERE id = ?1)",
            params![id.as_str()],
            |row| row.get(0),
        )?;
        Ok(found)
    }
}

impl GraphStore for ConnView<'_> {
    fn ensure_unique(&self, label: &str, property: &str) -> StorageResult<()> {
        self.conn.execute(
            "INSERT OR IGNORE INTO constraints (label, property) VALUES (?1, ?2)",
            params![label, property],
        )?;
        Ok(())
    }

    fn create_node(&self, label: &str, properties: &Properties) -> StorageResult<NodeId> {
        self.check_constraints(label, properties)?;

        let mut node = Node::new(label);
        node.properties = properties.clone();
        self.insert_node(&node)?;
        Ok(node.id)
    }

    fn merge_node(
        &self,
        label: &str,
        key: &Properties,
        on_create: &Properties,
    ) -> StorageResult<Merged<NodeId>> {
        let id = NodeId::for_key(label, key);
        if self.node_exists(&id)? {
            return Ok(Merged { id, created: false });
        }

        let mut properties = on_create.clone();
        properties.extend(key.iter().map(|(k, v)| (k.clone(), v.clone())));
        self.check_constraints(label, &properties)?;

        let mut node = Node::new(label);
        node.id = id.clone();
        node.properties = properties;
        self.insert_node(&node)?;
        Ok(Merged { id, created: true })
    }

    fn update_node(&self, id: &NodeId, set: &Properties) -> StorageResult<bool> {
        let Some(mut node) = self.load_node(id)? else {
            return Ok(false);
        };
        node.properties
            .extend(set.iter().map(|(k, v)| (k.clone(), v.clone())));
        node.metadata.modified_at = Some(Utc::now());
        self.write_node(&node)?;
        Ok(true)
    }

    fn load_node(&self, id: &NodeId) -> StorageResult<Option<Node>> {
        let row: Option<(String, String, String, String)> = self
            .conn
            .query_row(
                &format!("SELECT {NODE_COLUMNS} FROM nodes WHERE id = ?1"),
                params![id.as_str()],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
            )
            .optional()?;

        match row {
            Some((id, label, properties, metadata)) => {
                Ok(Some(row_to_node(id, label, properties, metadata)?))
            }
            None => Ok(None),
        }
    }

    fn find_nodes(&self, filter: &NodeFilter) -> StorageResult<Vec<Node>> {
        self.query_nodes(filter)
    }

    fn exists(&self, filter: &NodeFilter) -> StorageResult<bool> {
        let (clause, values) = node_where(filter)?;
        let found: bool = self.conn.query_row(
            &format!("SELECT EXISTS(SELECT 1 FROM nodes{clause})"),
            params_from_iter(values.iter()),
            |row| row.get(0),
        )?;
        Ok(found)
    }

    fn remove_node_properties(&self, label: &str, keys: &[&str]) -> StorageResult<()> {
        for mut node in self.query_nodes(&NodeFilter::new().with_label(label))? {
            let before = node.properties.len();
            for key in keys {
                node.properties.remove(*key);
            }
            if node.properties.len() != before {
                node.metadata.modified_at = Some(Utc::now());
                self.write_node(&node)?;
            }
        }
        Ok(())
    }

    fn delete_nodes(&self, filter: &NodeFilter) -> StorageResult<usize> {
        let nodes = self.query_nodes(filter)?;
        for node in &nodes {
            // Delete edges connected to this node
            self.conn.execute(
                "DELETE FROM edges WHERE source_id = ?1 OR target_id = ?1",
                params![node.id.as_str()],
            )?;
            self.conn
                .execute("DELETE FROM nodes WHERE id = ?1", params![node.id.as_str()])?;
        }
        Ok(nodes.len())
    }

    fn node_count(&self, label: Option<&str>) -> StorageResult<usize> {
        let count: i64 = match label {
            Some(label) => self.conn.query_row(
                "SELECT COUNT(*) FROM nodes WHERE label = ?1",
                params![label],
                |row| row.get(0),
            )?,
            None => self
                .conn
                .query_row("SELECT COUNT(*) FROM nodes", [], |row| row.get(0))?,
        };
        Ok(count as usize)
    }

    fn create_relationship(
        &self,
        from: &NodeId,
        to: &NodeId,
        relationship: &str,
        properties: &Properties,
    ) -> StorageResult<EdgeId> {
        for endpoint in [from, to] {
            if !self.node_exists(endpoint)? {
                return Err(StorageError::NodeNotFound(endpoint.to_string()));
            }
        }

        let mut edge = Edge::new(from.clone(), to.clone(), relationship);
        edge.properties = properties.clone();
        self.conn.execute(
            "INSERT INTO edges (id, source_id, target_id, relationship, created_at, properties_json)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                edge.id.as_str(),
                edge.source.as_str(),
                edge.target.as_str(),
                edge.relationship,
                edge.created_at.to_rfc3339(),
                serde_json::to_string(&edge.properties)?,
            ],
        )?;
        Ok(edge.id)
    }

    fn merge_relationship(
        &self,
        from: &NodeId,
        to: &NodeId,
        relationship: &str,
        on_create: &Properties,
    ) -> StorageResult<Merged<EdgeId>> {
        let existing: Option<String> = self
            .conn
            .query_row(
                "SELECT id FROM edges WHERE source_id = ?1 AND target_id = ?2 AND relationship = ?3
                 ORDER BY rowid LIMIT 1",
                params![from.as_str(), to.as_str(), relationship],
                |row| row.get(0),
            )
            .optional()?;

        match existing {
            Some(id) => Ok(Merged {
                id: EdgeId::from_string(id),
                created: false,
            }),
            None => Ok(Merged {
                id: self.create_relationship(from, to, relationship, on_create)?,
                created: true,
            }),
        }
    }

    fn update_relationship(&self, id: &EdgeId, set: &Properties) -> StorageResult<bool> {
        let Some(mut edge) = self.load_edge(id)? else {
            return Ok(false);
        };
        edge.properties
            .extend(set.iter().map(|(k, v)| (k.clone(), v.clone())));
        self.conn.execute(
            "UPDATE edges SET properties_json = ?2 WHERE id = ?1",
            params![id.as_str(), serde_json::to_string(&edge.properties)?],
        )?;
        Ok(true)
    }

    fn edges_from(&self, id: &NodeId, relationship: Option<&str>) -> StorageResult<Vec<Edge>> {
        let mut filter = EdgeFilter::new().with_source(id.clone());
        filter.relationship = relationship.map(str::to_string);
        self.query_edges(&filter)
    }

    fn edges_to(&self, id: &NodeId, relationship: Option<&str>) -> StorageResult<Vec<Edge>> {
        let mut filter = EdgeFilter::new().with_target(id.clone());
        filter.relationship = relationship.map(str::to_string);
        self.query_edges(&filter)
    }

    fn find_edges(&self, filter: &EdgeFilter) -> StorageResult<Vec<Edge>> {
        self.query_edges(filter)
    }

    fn edge_count(&self, relationship: Option<&str>) -> StorageResult<usize> {
        let count: i64 = match relationship {
            Some(rel) => self.conn.query_row(
                "SELECT COUNT(*) FROM edges WHERE relationship = ?1",
                params![rel],
                |row| row.get(0),
            )?,
            None => self
                .conn
                .query_row("SELECT COUNT(*) FROM edges", [], |row| row.get(0))?,
        };
        Ok(count as usize)
    }

    fn transaction(&self, body: &mut TxBody<'_>) -> StorageResult<()> {
        let savepoint = format!("sp_{}", self.depth);
        self.conn.execute_batch(&format!("SAVEPOINT {savepoint}"))?;

        let nested = ConnView {
            conn: self.conn,
            depth: self.depth + 1,
        };
        let tx: &dyn GraphStore = &nested;
        match body(tx) {
            Ok(()) => {
                self.conn.execute_batch(&format!("RELEASE {savepoint}"))?;
                Ok(())
            }
            Err(e) => {
                self.conn.execute_batch(&format!(
                    "ROLLBACK TO {savepoint}; RELEASE {savepoint}"
                ))?;
                Err(e)
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Row mapping
// ---------------------------------------------------------------------------

fn row_to_node(
    id: String,
    label: String,
    properties_json: String,
    metadata_json: String,
) -> StorageResult<Node> {
    Ok(Node {
        id: NodeId::from_string(id),
        label,
        properties: serde_json::from_str(&properties_json)?,
        metadata: serde_json::from_str::<NodeMetadata>(&metadata_json)?,
    })
}

fn row_to_edge(
    id: String,
    source_id: String,
    target_id: String,
    relationship: String,
    created_at: String,
    properties_json: String,
) -> StorageResult<Edge> {
    Ok(Edge {
        id: EdgeId::from_string(id),
        source: NodeId::from_string(source_id),
        target: NodeId::from_string(target_id),
        relationship,
        created_at: DateTime::parse_from_rfc3339(&created_at)
            .map_err(|e| StorageError::DateParse(e.to_string()))?
            .with_timezone(&Utc),
        properties: serde_json::from_str(&properties_json)?,
    })
}

/// WHERE clause (with leading space) and bound values for a node filter.
fn node_where(filter: &NodeFilter) -> StorageResult<(String, Vec<Value>)> {
    let mut clauses = Vec::new();
    let mut values = Vec::new();

    if let Some(ref label) = filter.label {
        clauses.push("label = ?".to_string());
        values.push(Value::Text(label.clone()));
    }

    for (key, value) in &filter.properties {
        match value {
            // Provenance has its own indexed column
            PropertyValue::String(s) if key == SOURCE_PROPERTY => {
                clauses.push("source = ?".to_string());
                values.push(Value::Text(s.clone()));
            }
            _ => {
                clauses.push("json_extract(properties_json, ?) = ?".to_string());
                values.push(Value::Text(json_path(key)));
                values.push(sql_value(value)?);
            }
        }
    }

    if clauses.is_empty() {
        Ok((String::new(), values))
    } else {
        Ok((format!(" WHERE {}", clauses.join(" AND ")), values))
    }
}

fn json_path(key: &str) -> String {
    format!("$.\"{}\"", key.replace('"', "\\\""))
}

/// SQL value comparable with what `json_extract` yields for `value`.
fn sql_value(value: &PropertyValue) -> StorageResult<Value> {
    Ok(match value {
        PropertyValue::String(s) => Value::Text(s.clone()),
        PropertyValue::Int(i) => Value::Integer(*i),
        PropertyValue::Float(f) => Value::Real(*f),
        PropertyValue::Bool(b) => Value::Integer(i64::from(*b)),
        PropertyValue::Array(_) => Value::Text(serde_json::to_string(value)?),
    })
}
