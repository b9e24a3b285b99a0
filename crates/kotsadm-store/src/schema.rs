// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Declarative table definitions.
//!
//! One descriptor per table drives DDL for both the legacy PostgreSQL
//! database and the replicated store, and tells the migration engine how to
//! read and coerce every column. Table and column names are load-bearing:
//! all SQL in the release manager is written against them.

/// Version of the table set below; recorded in `kotsadm_params`.
pub const SCHEMA_VERSION: i64 = 3;

/// Logical column type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    /// Free text.
    Text,
    /// 64-bit integer.
    Integer,
    /// Boolean (0/1 in the replicated store).
    Boolean,
    /// Point in time (unix seconds in the replicated store).
    Timestamp,
    /// Binary blob (base64 text in the replicated store).
    Binary,
}

/// One column of a table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnSchema {
    /// Column name.
    pub name: &'static str,
    /// Logical type.
    pub kind: ColumnKind,
    /// Whether the column is NOT NULL.
    pub required: bool,
}

/// One table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableSchema {
    /// Table name.
    pub name: &'static str,
    /// Columns in declaration order.
    pub columns: &'static [ColumnSchema],
    /// Primary key columns.
    pub primary_key: &'static [&'static str],
    /// Columns with a single-column unique constraint.
    pub unique: &'static [&'static str],
}

impl TableSchema {
    /// Look up a column by name.
    pub fn column(&self, name: &str) -> Option<&ColumnSchema> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Whether `name` is part of the primary key.
    pub fn is_key(&self, name: &str) -> bool {
        self.primary_key.contains(&name)
    }
}

/// SQL dialect to render DDL for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    /// Replicated store (SQLite dialect).
    Sqlite,
    /// Legacy relational database.
    Postgres,
}

impl Dialect {
    /// Column type for `kind` in this dialect.
    pub fn column_type(&self, kind: ColumnKind) -> &'static str {
        match (self, kind) {
            (Self::Sqlite, ColumnKind::Text | ColumnKind::Binary) => "TEXT",
            (Self::Sqlite, _) => "INTEGER",
            (Self::Postgres, ColumnKind::Text) => "TEXT",
            (Self::Postgres, ColumnKind::Integer) => "BIGINT",
            (Self::Postgres, ColumnKind::Boolean) => "BOOLEAN",
            (Self::Postgres, ColumnKind::Timestamp) => "TIMESTAMP WITHOUT TIME ZONE",
            (Self::Postgres, ColumnKind::Binary) => "BYTEA",
        }
    }
}

/// Render an idempotent `CREATE TABLE` statement.
pub fn create_table_sql(table: &TableSchema, dialect: Dialect) -> String {
    let mut lines: Vec<String> = table
        .columns
        .iter()
        .map(|c| {
            let null = if c.required { " NOT NULL" } else { "" };
            format!("    {} {}{}", c.name, dialect.column_type(c.kind), null)
        })
        .collect();
    lines.push(format!("    PRIMARY KEY ({})", table.primary_key.join(", ")));
    lines.extend(table.unique.iter().map(|c| format!("    UNIQUE ({})", c)));

    format!(
        "CREATE TABLE IF NOT EXISTS {} (\n{}\n)",
        table.name,
        lines.join(",\n")
    )
}

/// DDL for every table, in dependency order.
pub fn ddl(dialect: Dialect) -> Vec<String> {
    TABLES.iter().map(|t| create_table_sql(t, dialect)).collect()
}

/// Look up a table by name.
pub fn table(name: &str) -> Option<&'static TableSchema> {
    TABLES.iter().find(|t| t.name == name)
}

const fn text(name: &'static str) -> ColumnSchema {
    ColumnSchema {
        name,
        kind: ColumnKind::Text,
        required: false,
    }
}

const fn required(mut column: ColumnSchema) -> ColumnSchema {
    column.required = true;
    column
}

const fn int(name: &'static str) -> ColumnSchema {
    ColumnSchema {
        name,
        kind: ColumnKind::Integer,
        required: false,
    }
}

const fn boolean(name: &'static str) -> ColumnSchema {
    ColumnSchema {
        name,
        kind: ColumnKind::Boolean,
        required: false,
    }
}

const fn timestamp(name: &'static str) -> ColumnSchema {
    ColumnSchema {
        name,
        kind: ColumnKind::Timestamp,
        required: false,
    }
}

const fn binary(name: &'static str) -> ColumnSchema {
    ColumnSchema {
        name,
        kind: ColumnKind::Binary,
        required: false,
    }
}

/// Managed applications.
pub const APP: TableSchema = TableSchema {
    name: "app",
    columns: &[
        required(text("id")),
        required(text("name")),
        text("icon_uri"),
        required(timestamp("created_at")),
        timestamp("updated_at"),
        required(text("slug")),
        required(text("upstream_uri")),
        text("license"),
        int("current_sequence"),
        timestamp("last_update_check_at"),
        required(text("install_state")),
        boolean("is_airgap"),
        text("channel_id"),
        boolean("is_semver_required"),
        text("snapshot_ttl_new"),
        text("snapshot_schedule"),
    ],
    primary_key: &["id"],
    unique: &["slug"],
};

/// Deployment targets.
pub const CLUSTER: TableSchema = TableSchema {
    name: "cluster",
    columns: &[
        required(text("id")),
        required(text("title")),
        required(text("slug")),
        required(timestamp("created_at")),
        timestamp("updated_at"),
        text("token"),
        required(text("cluster_type")),
        boolean("is_all_users"),
        text("snapshot_schedule"),
        text("snapshot_ttl"),
    ],
    primary_key: &["id"],
    unique: &["slug", "token"],
};

/// App x cluster join with the currently deployed sequence.
pub const APP_DOWNSTREAM: TableSchema = TableSchema {
    name: "app_downstream",
    columns: &[
        required(text("app_id")),
        required(text("cluster_id")),
        required(text("downstream_name")),
        int("current_sequence"),
    ],
    primary_key: &["app_id", "cluster_id"],
    unique: &[],
};

/// Immutable release records.
pub const APP_VERSION: TableSchema = TableSchema {
    name: "app_version",
    columns: &[
        required(text("app_id")),
        required(int("sequence")),
        text("update_cursor"),
        text("channel_id"),
        text("channel_name"),
        timestamp("upstream_released_at"),
        required(timestamp("created_at")),
        required(text("version_label")),
        boolean("is_required"),
        text("release_notes"),
        text("supportbundle_spec"),
        text("preflight_spec"),
        text("analyzer_spec"),
        text("app_spec"),
        text("kots_app_spec"),
        text("kots_installation_spec"),
        text("kots_license"),
        text("config_spec"),
        text("config_values"),
        timestamp("applied_at"),
        text("status"),
        text("backup_spec"),
        text("identity_spec"),
        binary("branding_archive"),
        text("embeddedcluster_config"),
    ],
    primary_key: &["app_id", "sequence"],
    unique: &[],
};

/// Per-cluster deployment record of a release.
pub const APP_DOWNSTREAM_VERSION: TableSchema = TableSchema {
    name: "app_downstream_version",
    columns: &[
        required(text("app_id")),
        required(text("cluster_id")),
        required(int("sequence")),
        required(int("parent_sequence")),
        required(timestamp("created_at")),
        timestamp("applied_at"),
        required(text("version_label")),
        required(text("status")),
        text("status_info"),
        required(text("source")),
        text("diff_summary"),
        text("diff_summary_error"),
        text("preflight_progress"),
        text("preflight_result"),
        timestamp("preflight_result_created_at"),
        boolean("preflight_ignore_permissions"),
        boolean("preflight_skipped"),
        text("git_commit_url"),
        boolean("git_deployable"),
    ],
    primary_key: &["app_id", "cluster_id", "sequence"],
    unique: &[],
};

/// Apply and dry-run output of a deploy attempt (stdout/stderr are base64).
pub const APP_DOWNSTREAM_OUTPUT: TableSchema = TableSchema {
    name: "app_downstream_output",
    columns: &[
        required(text("app_id")),
        required(text("cluster_id")),
        required(int("downstream_sequence")),
        text("dryrun_stdout"),
        text("dryrun_stderr"),
        text("apply_stdout"),
        text("apply_stderr"),
        text("helm_stdout"),
        text("helm_stderr"),
        required(boolean("is_error")),
    ],
    primary_key: &["app_id", "cluster_id", "downstream_sequence"],
    unique: &[],
};

/// Last reported resource states per app.
pub const APP_STATUS: TableSchema = TableSchema {
    name: "app_status",
    columns: &[
        required(text("app_id")),
        text("resource_states"),
        timestamp("updated_at"),
        int("sequence"),
    ],
    primary_key: &["app_id"],
    unique: &[],
};

/// Progress messages of long running tasks.
pub const API_TASK_STATUS: TableSchema = TableSchema {
    name: "api_task_status",
    columns: &[
        required(text("id")),
        timestamp("updated_at"),
        text("current_message"),
        text("status"),
    ],
    primary_key: &["id"],
    unique: &[],
};

/// Key/value parameters (migration sentinel, schema version).
pub const KOTSADM_PARAMS: TableSchema = TableSchema {
    name: "kotsadm_params",
    columns: &[required(text("key")), required(text("value"))],
    primary_key: &["key"],
    unique: &[],
};

/// User to app grants.
pub const USER_APP: TableSchema = TableSchema {
    name: "user_app",
    columns: &[required(text("user_id")), required(text("app_id"))],
    primary_key: &["user_id", "app_id"],
    unique: &[],
};

/// User to cluster grants.
pub const USER_CLUSTER: TableSchema = TableSchema {
    name: "user_cluster",
    columns: &[required(text("user_id")), required(text("cluster_id"))],
    primary_key: &["user_id", "cluster_id"],
    unique: &[],
};

/// Historical preflight runs.
pub const PREFLIGHT_RESULT: TableSchema = TableSchema {
    name: "preflight_result",
    columns: &[
        required(text("id")),
        required(text("app_id")),
        required(text("cluster_id")),
        required(int("sequence")),
        text("result"),
        required(timestamp("created_at")),
    ],
    primary_key: &["id"],
    unique: &[],
};

/// Pending scheduled app snapshots.
pub const SCHEDULED_SNAPSHOTS: TableSchema = TableSchema {
    name: "scheduled_snapshots",
    columns: &[
        required(text("id")),
        required(text("app_id")),
        required(timestamp("scheduled_timestamp")),
        text("backup_name"),
    ],
    primary_key: &["id"],
    unique: &[],
};

/// Pending scheduled instance snapshots.
pub const SCHEDULED_INSTANCE_SNAPSHOTS: TableSchema = TableSchema {
    name: "scheduled_instance_snapshots",
    columns: &[
        required(text("id")),
        required(text("cluster_id")),
        required(timestamp("scheduled_timestamp")),
        text("backup_name"),
    ],
    primary_key: &["id"],
    unique: &[],
};

/// Every table, in the order DDL and migrations process them.
pub const TABLES: &[TableSchema] = &[
    APP,
    CLUSTER,
    APP_DOWNSTREAM,
    APP_VERSION,
    APP_DOWNSTREAM_VERSION,
    APP_DOWNSTREAM_OUTPUT,
    APP_STATUS,
    API_TASK_STATUS,
    KOTSADM_PARAMS,
    USER_APP,
    USER_CLUSTER,
    PREFLIGHT_RESULT,
    SCHEDULED_SNAPSHOTS,
    SCHEDULED_INSTANCE_SNAPSHOTS,
];
