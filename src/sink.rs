//! Sink interface (spec §6): a narrow trait of per-kind insert/bulk-insert
//! operations plus a small stats surface. The core depends only on this
//! trait — `SqliteSink` is the default, embedded-file implementation.

use crate::rows::{
    AnalysisRow, ExperimentRow, IdentifierRow, IdentifierRowKind, LinkRow, LinkRowKind,
    SamplePoolRow, SampleRow, StudyRow, SubmissionRow, RunRow,
};
use anyhow::{Context, Result};
use rusqlite::{params, Connection};
use std::path::Path;

#[derive(Debug, Default, Clone, Copy)]
pub struct SinkStats {
    pub studies: u64,
    pub experiments: u64,
    pub samples: u64,
    pub runs: u64,
}

/// The only capabilities the core requires of a durable store (spec §9
/// "sink contract as an interface, not an ORM"). Bulk operations are atomic
/// — either every row in the batch is durable, or none are.
pub trait Sink {
    fn insert_study(&mut self, row: &StudyRow) -> Result<()>;
    fn bulk_insert_study(&mut self, rows: &[StudyRow]) -> Result<usize>;
    fn insert_experiment(&mut self, row: &ExperimentRow) -> Result<()>;
    fn bulk_insert_experiment(&mut self, rows: &[ExperimentRow]) -> Result<usize>;
    fn insert_sample(&mut self, row: &SampleRow) -> Result<()>;
    fn bulk_insert_sample(&mut self, rows: &[SampleRow]) -> Result<usize>;
    fn insert_run(&mut self, row: &RunRow) -> Result<()>;
    fn bulk_insert_run(&mut self, rows: &[RunRow]) -> Result<usize>;
    fn insert_analysis(&mut self, row: &AnalysisRow) -> Result<()>;
    fn bulk_insert_analysis(&mut self, rows: &[AnalysisRow]) -> Result<usize>;
    fn insert_submission(&mut self, row: &SubmissionRow) -> Result<()>;
    fn bulk_insert_submission(&mut self, rows: &[SubmissionRow]) -> Result<usize>;

    fn insert_sample_pool(&mut self, row: &SamplePoolRow) -> Result<()>;
    fn insert_identifier(&mut self, row: &IdentifierRow) -> Result<()>;
    fn insert_link(&mut self, row: &LinkRow) -> Result<()>;

    fn stats(&self) -> Result<SinkStats>;
    fn update_statistics(&self) -> Result<()>;
}

/// The default embedded sink: a single SQLite file, tuned at session start
/// per spec §6 (WAL, normal sync, generous cache, FK checks off during
/// ingest, a busy timeout).
pub struct SqliteSink {
    conn: Connection,
}

impl SqliteSink {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path.as_ref())
            .with_context(|| format!("opening sink database at {}", path.as_ref().display()))?;
        let sink = Self { conn };
        sink.tune()?;
        sink.create_schema()?;
        Ok(sink)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("opening in-memory sink database")?;
        let sink = Self { conn };
        sink.tune()?;
        sink.create_schema()?;
        Ok(sink)
    }

    fn tune(&self) -> Result<()> {
        self.conn.pragma_update(None, "journal_mode", "WAL")?;
        self.conn.pragma_update(None, "synchronous", "NORMAL")?;
        self.conn.pragma_update(None, "cache_size", -64_000i64)?;
        self.conn.pragma_update(None, "foreign_keys", "OFF")?;
        self.conn.pragma_update(None, "busy_timeout", 30_000i64)?;
        Ok(())
    }

    /// Restore foreign-key enforcement once ingest is done (tuning knob is
    /// scoped to the ingest session, per spec §6).
    pub fn restore_foreign_keys(&self) -> Result<()> {
        self.conn.pragma_update(None, "foreign_keys", "ON").map_err(Into::into)
    }

    fn create_schema(&self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS studies (
                accession TEXT PRIMARY KEY,
                title TEXT, center TEXT, study_type TEXT,
                organism TEXT, tissue TEXT, cell_type TEXT, cell_line TEXT,
                sex TEXT, age TEXT, disease TEXT, treatment TEXT,
                geo_loc_name TEXT, lat_lon TEXT, collection_date TEXT,
                env_biome TEXT, env_feature TEXT, env_material TEXT,
                biosample_accession TEXT, bioproject_accession TEXT,
                metadata_json TEXT
            );
            CREATE TABLE IF NOT EXISTS experiments (
                accession TEXT PRIMARY KEY,
                title TEXT, center TEXT, study_accession TEXT,
                platform TEXT, instrument_model TEXT,
                library_strategy TEXT, library_source TEXT, library_selection TEXT,
                organism TEXT, tissue TEXT, cell_type TEXT, cell_line TEXT,
                sex TEXT, age TEXT, disease TEXT, treatment TEXT,
                geo_loc_name TEXT, lat_lon TEXT, collection_date TEXT,
                env_biome TEXT, env_feature TEXT, env_material TEXT,
                biosample_accession TEXT, bioproject_accession TEXT,
                metadata_json TEXT
            );
            CREATE TABLE IF NOT EXISTS samples (
                accession TEXT PRIMARY KEY,
                title TEXT, center TEXT, taxon_id TEXT,
                organism TEXT, tissue TEXT, cell_type TEXT, cell_line TEXT,
                sex TEXT, age TEXT, disease TEXT, treatment TEXT,
                geo_loc_name TEXT, lat_lon TEXT, collection_date TEXT,
                env_biome TEXT, env_feature TEXT, env_material TEXT,
                biosample_accession TEXT, bioproject_accession TEXT,
                metadata_json TEXT
            );
            CREATE TABLE IF NOT EXISTS runs (
                accession TEXT PRIMARY KEY,
                title TEXT, experiment_accession TEXT, run_date TEXT,
                read_count INTEGER, base_count INTEGER,
                organism TEXT, tissue TEXT, cell_type TEXT, cell_line TEXT,
                sex TEXT, age TEXT, disease TEXT, treatment TEXT,
                geo_loc_name TEXT, lat_lon TEXT, collection_date TEXT,
                env_biome TEXT, env_feature TEXT, env_material TEXT,
                biosample_accession TEXT, bioproject_accession TEXT,
                metadata_json TEXT
            );
            CREATE TABLE IF NOT EXISTS analyses (
                accession TEXT PRIMARY KEY,
                title TEXT, study_accession TEXT, analysis_type TEXT,
                organism TEXT, tissue TEXT, cell_type TEXT, cell_line TEXT,
                sex TEXT, age TEXT, disease TEXT, treatment TEXT,
                geo_loc_name TEXT, lat_lon TEXT, collection_date TEXT,
                env_biome TEXT, env_feature TEXT, env_material TEXT,
                biosample_accession TEXT, bioproject_accession TEXT,
                metadata_json TEXT
            );
            CREATE TABLE IF NOT EXISTS submissions (
                accession TEXT PRIMARY KEY,
                title TEXT, center TEXT, submission_date TEXT,
                organism TEXT, tissue TEXT, cell_type TEXT, cell_line TEXT,
                sex TEXT, age TEXT, disease TEXT, treatment TEXT,
                geo_loc_name TEXT, lat_lon TEXT, collection_date TEXT,
                env_biome TEXT, env_feature TEXT, env_material TEXT,
                biosample_accession TEXT, bioproject_accession TEXT,
                metadata_json TEXT
            );
            CREATE TABLE IF NOT EXISTS sample_pools (
                parent_accession TEXT, member_accession TEXT, member_name TEXT,
                proportion REAL, read_label TEXT,
                UNIQUE(parent_accession, member_accession, read_label)
            );
            CREATE TABLE IF NOT EXISTS identifiers (
                owner_kind TEXT, owner_accession TEXT, kind TEXT,
                namespace TEXT, value TEXT,
                UNIQUE(owner_kind, owner_accession, kind, value)
            );
            CREATE TABLE IF NOT EXISTS links (
                owner_kind TEXT, owner_accession TEXT, kind TEXT,
                label TEXT, target TEXT,
                UNIQUE(owner_kind, owner_accession, kind, target)
            );
            "#,
        )?;
        Ok(())
    }
}

macro_rules! hoisted_params {
    ($r:expr) => {
        (
            $r.hoisted.organism.clone(),
            $r.hoisted.tissue.clone(),
            $r.hoisted.cell_type.clone(),
            $r.hoisted.cell_line.clone(),
            $r.hoisted.sex.clone(),
            $r.hoisted.age.clone(),
            $r.hoisted.disease.clone(),
            $r.hoisted.treatment.clone(),
            $r.hoisted.geo_loc_name.clone(),
            $r.hoisted.lat_lon.clone(),
            $r.hoisted.collection_date.clone(),
            $r.hoisted.env_biome.clone(),
            $r.hoisted.env_feature.clone(),
            $r.hoisted.env_material.clone(),
            $r.hoisted.biosample_accession.clone(),
            $r.hoisted.bioproject_accession.clone(),
        )
    };
}

impl Sink for SqliteSink {
    fn insert_study(&mut self, row: &StudyRow) -> Result<()> {
        let h = hoisted_params!(row);
        self.conn.execute(
            "INSERT INTO studies (accession, title, center, study_type,
                organism, tissue, cell_type, cell_line, sex, age, disease, treatment,
                geo_loc_name, lat_lon, collection_date, env_biome, env_feature, env_material,
                biosample_accession, bioproject_accession, metadata_json)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16,?17,?18,?19,?20,?21)
             ON CONFLICT(accession) DO UPDATE SET
                title=excluded.title, center=excluded.center, study_type=excluded.study_type,
                organism=excluded.organism, tissue=excluded.tissue, cell_type=excluded.cell_type,
                cell_line=excluded.cell_line, sex=excluded.sex, age=excluded.age,
                disease=excluded.disease, treatment=excluded.treatment,
                geo_loc_name=excluded.geo_loc_name, lat_lon=excluded.lat_lon,
                collection_date=excluded.collection_date, env_biome=excluded.env_biome,
                env_feature=excluded.env_feature, env_material=excluded.env_material,
                biosample_accession=excluded.biosample_accession,
                bioproject_accession=excluded.bioproject_accession,
                metadata_json=excluded.metadata_json",
            params![
                row.accession, row.title, row.center, row.study_type,
                h.0, h.1, h.2, h.3, h.4, h.5, h.6, h.7, h.8, h.9, h.10, h.11, h.12, h.13, h.14, h.15,
                row.metadata_json
            ],
        )?;
        Ok(())
    }

    fn bulk_insert_study(&mut self, rows: &[StudyRow]) -> Result<usize> {
        let tx = self.conn.transaction()?;
        let mut count = 0;
        for row in rows {
            let h = hoisted_params!(row);
            tx.execute(
                "INSERT INTO studies (accession, title, center, study_type,
                    organism, tissue, cell_type, cell_line, sex, age, disease, treatment,
                    geo_loc_name, lat_lon, collection_date, env_biome, env_feature, env_material,
                    biosample_accession, bioproject_accession, metadata_json)
                 VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16,?17,?18,?19,?20,?21)
                 ON CONFLICT(accession) DO UPDATE SET
                    title=excluded.title, metadata_json=excluded.metadata_json",
                params![
                    row.accession, row.title, row.center, row.study_type,
                    h.0, h.1, h.2, h.3, h.4, h.5, h.6, h.7, h.8, h.9, h.10, h.11, h.12, h.13, h.14, h.15,
                    row.metadata_json
                ],
            )?;
            count += 1;
        }
        tx.commit()?;
        Ok(count)
    }

    fn insert_experiment(&mut self, row: &ExperimentRow) -> Result<()> {
        let h = hoisted_params!(row);
        self.conn.execute(
            "INSERT INTO experiments (accession, title, center, study_accession,
                platform, instrument_model, library_strategy, library_source, library_selection,
                organism, tissue, cell_type, cell_line, sex, age, disease, treatment,
                geo_loc_name, lat_lon, collection_date, env_biome, env_feature, env_material,
                biosample_accession, bioproject_accession, metadata_json)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16,?17,?18,?19,?20,?21,?22,?23,?24,?25,?26)
             ON CONFLICT(accession) DO UPDATE SET
                title=excluded.title, platform=excluded.platform,
                library_strategy=excluded.library_strategy, metadata_json=excluded.metadata_json",
            params![
                row.accession, row.title, row.center, row.study_accession,
                row.platform, row.instrument_model, row.library_strategy, row.library_source, row.library_selection,
                h.0, h.1, h.2, h.3, h.4, h.5, h.6, h.7, h.8, h.9, h.10, h.11, h.12, h.13, h.14, h.15,
                row.metadata_json
            ],
        )?;
        Ok(())
    }

    fn bulk_insert_experiment(&mut self, rows: &[ExperimentRow]) -> Result<usize> {
        let tx = self.conn.transaction()?;
        let mut count = 0;
        for row in rows {
            let h = hoisted_params!(row);
            tx.execute(
                "INSERT INTO experiments (accession, title, center, study_accession,
                    platform, instrument_model, library_strategy, library_source, library_selection,
                    organism, tissue, cell_type, cell_line, sex, age, disease, treatment,
                    geo_loc_name, lat_lon, collection_date, env_biome, env_feature, env_material,
                    biosample_accession, bioproject_accession, metadata_json)
                 VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16,?17,?18,?19,?20,?21,?22,?23,?24,?25,?26)
                 ON CONFLICT(accession) DO UPDATE SET
                    title=excluded.title, metadata_json=excluded.metadata_json",
                params![
                    row.accession, row.title, row.center, row.study_accession,
                    row.platform, row.instrument_model, row.library_strategy, row.library_source, row.library_selection,
                    h.0, h.1, h.2, h.3, h.4, h.5, h.6, h.7, h.8, h.9, h.10, h.11, h.12, h.13, h.14, h.15,
                    row.metadata_json
                ],
            )?;
            count += 1;
        }
        tx.commit()?;
        Ok(count)
    }

    fn insert_sample(&mut self, row: &SampleRow) -> Result<()> {
        let h = hoisted_params!(row);
        self.conn.execute(
            "INSERT INTO samples (accession, title, center, taxon_id,
                organism, tissue, cell_type, cell_line, sex, age, disease, treatment,
                geo_loc_name, lat_lon, collection_date, env_biome, env_feature, env_material,
                biosample_accession, bioproject_accession, metadata_json)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16,?17,?18,?19,?20,?21)
             ON CONFLICT(accession) DO UPDATE SET
                title=excluded.title, metadata_json=excluded.metadata_json",
            params![
                row.accession, row.title, row.center, row.taxon_id,
                h.0, h.1, h.2, h.3, h.4, h.5, h.6, h.7, h.8, h.9, h.10, h.11, h.12, h.13, h.14, h.15,
                row.metadata_json
            ],
        )?;
        Ok(())
    }

    fn bulk_insert_sample(&mut self, rows: &[SampleRow]) -> Result<usize> {
        let tx = self.conn.transaction()?;
        let mut count = 0;
        for row in rows {
            let h = hoisted_params!(row);
            tx.execute(
                "INSERT INTO samples (accession, title, center, taxon_id,
                    organism, tissue, cell_type, cell_line, sex, age, disease, treatment,
                    geo_loc_name, lat_lon, collection_date, env_biome, env_feature, env_material,
                    biosample_accession, bioproject_accession, metadata_json)
                 VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16,?17,?18,?19,?20,?21)
                 ON CONFLICT(accession) DO UPDATE SET
                    title=excluded.title, metadata_json=excluded.metadata_json",
                params![
                    row.accession, row.title, row.center, row.taxon_id,
                    h.0, h.1, h.2, h.3, h.4, h.5, h.6, h.7, h.8, h.9, h.10, h.11, h.12, h.13, h.14, h.15,
                    row.metadata_json
                ],
            )?;
            count += 1;
        }
        tx.commit()?;
        Ok(count)
    }

    fn insert_run(&mut self, row: &RunRow) -> Result<()> {
        let h = hoisted_params!(row);
        let run_date = row.run_date.map(|d| d.unix_timestamp());
        self.conn.execute(
            "INSERT INTO runs (accession, title, experiment_accession, run_date, read_count, base_count,
                organism, tissue, cell_type, cell_line, sex, age, disease, treatment,
                geo_loc_name, lat_lon, collection_date, env_biome, env_feature, env_material,
                biosample_accession, bioproject_accession, metadata_json)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16,?17,?18,?19,?20,?21,?22,?23)
             ON CONFLICT(accession) DO UPDATE SET
                title=excluded.title, read_count=excluded.read_count, base_count=excluded.base_count,
                metadata_json=excluded.metadata_json",
            params![
                row.accession, row.title, row.experiment_accession, run_date, row.read_count, row.base_count,
                h.0, h.1, h.2, h.3, h.4, h.5, h.6, h.7, h.8, h.9, h.10, h.11, h.12, h.13, h.14, h.15,
                row.metadata_json
            ],
        )?;
        Ok(())
    }

    fn bulk_insert_run(&mut self, rows: &[RunRow]) -> Result<usize> {
        let tx = self.conn.transaction()?;
        let mut count = 0;
        for row in rows {
            let h = hoisted_params!(row);
            let run_date = row.run_date.map(|d| d.unix_timestamp());
            tx.execute(
                "INSERT INTO runs (accession, title, experiment_accession, run_date, read_count, base_count,
                    organism, tissue, cell_type, cell_line, sex, age, disease, treatment,
                    geo_loc_name, lat_lon, collection_date, env_biome, env_feature, env_material,
                    biosample_accession, bioproject_accession, metadata_json)
                 VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16,?17,?18,?19,?20,?21,?22,?23)
                 ON CONFLICT(accession) DO UPDATE SET
                    title=excluded.title, metadata_json=excluded.metadata_json",
                params![
                    row.accession, row.title, row.experiment_accession, run_date, row.read_count, row.base_count,
                    h.0, h.1, h.2, h.3, h.4, h.5, h.6, h.7, h.8, h.9, h.10, h.11, h.12, h.13, h.14, h.15,
                    row.metadata_json
                ],
            )?;
            count += 1;
        }
        tx.commit()?;
        Ok(count)
    }

    fn insert_analysis(&mut self, row: &AnalysisRow) -> Result<()> {
        let h = hoisted_params!(row);
        self.conn.execute(
            "INSERT INTO analyses (accession, title, study_accession, analysis_type,
                organism, tissue, cell_type, cell_line, sex, age, disease, treatment,
                geo_loc_name, lat_lon, collection_date, env_biome, env_feature, env_material,
                biosample_accession, bioproject_accession, metadata_json)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16,?17,?18,?19,?20,?21)
             ON CONFLICT(accession) DO UPDATE SET
                title=excluded.title, metadata_json=excluded.metadata_json",
            params![
                row.accession, row.title, row.study_accession, row.analysis_type,
                h.0, h.1, h.2, h.3, h.4, h.5, h.6, h.7, h.8, h.9, h.10, h.11, h.12, h.13, h.14, h.15,
                row.metadata_json
            ],
        )?;
        Ok(())
    }

    fn bulk_insert_analysis(&mut self, rows: &[AnalysisRow]) -> Result<usize> {
        let tx = self.conn.transaction()?;
        let mut count = 0;
        for row in rows {
            let h = hoisted_params!(row);
            tx.execute(
                "INSERT INTO analyses (accession, title, study_accession, analysis_type,
                    organism, tissue, cell_type, cell_line, sex, age, disease, treatment,
                    geo_loc_name, lat_lon, collection_date, env_biome, env_feature, env_material,
                    biosample_accession, bioproject_accession, metadata_json)
                 VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16,?17,?18,?19,?20,?21)
                 ON CONFLICT(accession) DO UPDATE SET
                    title=excluded.title, metadata_json=excluded.metadata_json",
                params![
                    row.accession, row.title, row.study_accession, row.analysis_type,
                    h.0, h.1, h.2, h.3, h.4, h.5, h.6, h.7, h.8, h.9, h.10, h.11, h.12, h.13, h.14, h.15,
                    row.metadata_json
                ],
            )?;
            count += 1;
        }
        tx.commit()?;
        Ok(count)
    }

    fn insert_submission(&mut self, row: &SubmissionRow) -> Result<()> {
        let h = hoisted_params!(row);
        let submission_date = row.submission_date.map(|d| d.unix_timestamp());
        self.conn.execute(
            "INSERT INTO submissions (accession, title, center, submission_date,
                organism, tissue, cell_type, cell_line, sex, age, disease, treatment,
                geo_loc_name, lat_lon, collection_date, env_biome, env_feature, env_material,
                biosample_accession, bioproject_accession, metadata_json)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16,?17,?18,?19,?20,?21)
             ON CONFLICT(accession) DO UPDATE SET
                title=excluded.title, metadata_json=excluded.metadata_json",
            params![
                row.accession, row.title, row.center, submission_date,
                h.0, h.1, h.2, h.3, h.4, h.5, h.6, h.7, h.8, h.9, h.10, h.11, h.12, h.13, h.14, h.15,
                row.metadata_json
            ],
        )?;
        Ok(())
    }

    fn bulk_insert_submission(&mut self, rows: &[SubmissionRow]) -> Result<usize> {
        let tx = self.conn.transaction()?;
        let mut count = 0;
        for row in rows {
            let h = hoisted_params!(row);
            let submission_date = row.submission_date.map(|d| d.unix_timestamp());
            tx.execute(
                "INSERT INTO submissions (accession, title, center, submission_date,
                    organism, tissue, cell_type, cell_line, sex, age, disease, treatment,
                    geo_loc_name, lat_lon, collection_date, env_biome, env_feature, env_material,
                    biosample_accession, bioproject_accession, metadata_json)
                 VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16,?17,?18,?19,?20,?21)
                 ON CONFLICT(accession) DO UPDATE SET
                    title=excluded.title, metadata_json=excluded.metadata_json",
                params![
                    row.accession, row.title, row.center, submission_date,
                    h.0, h.1, h.2, h.3, h.4, h.5, h.6, h.7, h.8, h.9, h.10, h.11, h.12, h.13, h.14, h.15,
                    row.metadata_json
                ],
            )?;
            count += 1;
        }
        tx.commit()?;
        Ok(count)
    }

    fn insert_sample_pool(&mut self, row: &SamplePoolRow) -> Result<()> {
        self.conn.execute(
            "INSERT INTO sample_pools (parent_accession, member_accession, member_name, proportion, read_label)
             VALUES (?1,?2,?3,?4,?5)
             ON CONFLICT(parent_accession, member_accession, read_label) DO UPDATE SET
                member_name=excluded.member_name, proportion=excluded.proportion",
            params![row.parent_accession, row.member_accession, row.member_name, row.proportion, row.read_label],
        )?;
        Ok(())
    }

    fn insert_identifier(&mut self, row: &IdentifierRow) -> Result<()> {
        let kind = match row.kind {
            IdentifierRowKind::Primary => "primary",
            IdentifierRowKind::Secondary => "secondary",
            IdentifierRowKind::External => "external",
            IdentifierRowKind::Submitter => "submitter",
            IdentifierRowKind::Uuid => "uuid",
        };
        self.conn.execute(
            "INSERT INTO identifiers (owner_kind, owner_accession, kind, namespace, value)
             VALUES (?1,?2,?3,?4,?5)
             ON CONFLICT(owner_kind, owner_accession, kind, value) DO UPDATE SET namespace=excluded.namespace",
            params![row.owner_kind, row.owner_accession, kind, row.namespace, row.value],
        )?;
        Ok(())
    }

    fn insert_link(&mut self, row: &LinkRow) -> Result<()> {
        let kind = match row.kind {
            LinkRowKind::Url => "url",
            LinkRowKind::Xref => "xref",
        };
        self.conn.execute(
            "INSERT INTO links (owner_kind, owner_accession, kind, label, target)
             VALUES (?1,?2,?3,?4,?5)
             ON CONFLICT(owner_kind, owner_accession, kind, target) DO UPDATE SET label=excluded.label",
            params![row.owner_kind, row.owner_accession, kind, row.label, row.target],
        )?;
        Ok(())
    }

    fn stats(&self) -> Result<SinkStats> {
        let studies = self.conn.query_row("SELECT COUNT(*) FROM studies", [], |r| r.get(0))?;
        let experiments = self.conn.query_row("SELECT COUNT(*) FROM experiments", [], |r| r.get(0))?;
        let samples = self.conn.query_row("SELECT COUNT(*) FROM samples", [], |r| r.get(0))?;
        let runs = self.conn.query_row("SELECT COUNT(*) FROM runs", [], |r| r.get(0))?;
        Ok(SinkStats { studies, experiments, samples, runs })
    }

    fn update_statistics(&self) -> Result<()> {
        self.conn.execute_batch("ANALYZE;")?;
        Ok(())
    }
}
