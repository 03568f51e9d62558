//! Selective region reload between runs
//!
//! A reload pass visits every vertex once. Vertices that can reload and have
//! dirty regions get their specification regenerated and executed on the
//! host; only the dirty regions are written back. A copy of each written
//! image (and, optionally, a text listing of the specification) is kept in a
//! fresh directory per pass:
//!
//! ```text
//! <application_data_dir>/reloaded_data_regions[_N]/{host}_dataSpec_{x}_{y}_{p}_{region}.dat
//! <report_dir>/reloaded_data_regions[_N]/{host}_dataSpec_{x}_{y}_{p}_{region}.txt
//! ```
//!
//! Regions are cleared from a vertex's dirty set only after their write is
//! acknowledged, so a failed pass can be retried and resumes with whatever
//! was not written.

use crate::address::ChipAddress;
use crate::config::ReloadConfig;
use crate::error::{HostError, Result};
use crate::placements::Placements;
use crate::regions::{RegionLocator, RegionWriter};
use crate::spec::{ExecutedSpecification, SpecificationExecutor};
use crate::transceiver::Transceiver;
use crate::vertices::{GenerationContext, MachineVertex};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Directory name used for each pass's artifacts
pub const RELOAD_FOLDER: &str = "reloaded_data_regions";

/// Outcome of one reload pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReloadSummary {
    /// Vertices visited
    pub vertices_visited: usize,
    /// Vertices with at least one region written
    pub vertices_reloaded: usize,
    /// Regions written across all vertices
    pub regions_written: usize,
    /// Directory holding the region images of this pass
    pub image_dir: PathBuf,
    /// Directory holding the text listings of this pass
    pub report_dir: PathBuf,
}

/// Create `parent/name`, or `parent/name_1`, `parent/name_2`, … if taken
///
/// # Errors
///
/// Returns `HostError::ReportDirectory` if the directory cannot be created.
pub fn unique_folder(parent: &Path, name: &str) -> Result<PathBuf> {
    let mut candidate = parent.join(name);
    let mut n = 1u32;
    while candidate.exists() {
        candidate = parent.join(format!("{name}_{n}"));
        n += 1;
    }
    fs::create_dir_all(&candidate).map_err(|source| HostError::ReportDirectory {
        path: candidate.clone(),
        source,
    })?;
    Ok(candidate)
}

/// File stem shared by the image and listing of one region
#[must_use]
pub fn artifact_stem(hostname: &str, core: ChipAddress, region: u8) -> String {
    format!(
        "{hostname}_dataSpec_{}_{}_{}_{region}",
        core.x(),
        core.y(),
        core.p()
    )
}

/// Rewrites dirty regions of placed vertices
#[derive(Debug)]
pub struct RegionReloader<'a> {
    writer: RegionWriter<'a>,
    locator: &'a dyn RegionLocator,
    executor: SpecificationExecutor,
    config: ReloadConfig,
}

impl<'a> RegionReloader<'a> {
    /// Reloader writing through `transceiver`
    pub fn new(
        transceiver: &'a dyn Transceiver,
        locator: &'a dyn RegionLocator,
        config: ReloadConfig,
    ) -> Self {
        Self {
            writer: RegionWriter::new(transceiver),
            locator,
            executor: SpecificationExecutor::new(),
            config,
        }
    }

    /// Run one pass over `vertices`
    ///
    /// # Errors
    ///
    /// Stops at the first failure: directory creation, a missing placement,
    /// specification generation or execution, a size conflict with an earlier
    /// pass, or a failed write. Regions written before the failure stay
    /// written and are no longer dirty.
    pub fn reload(
        &mut self,
        vertices: &mut [Box<dyn MachineVertex>],
        placements: &dyn Placements,
        ctx: &GenerationContext<'_>,
    ) -> Result<ReloadSummary> {
        let image_dir = unique_folder(&self.config.application_data_dir, RELOAD_FOLDER)?;
        let report_dir = unique_folder(&self.config.report_dir, RELOAD_FOLDER)?;
        let mut summary = ReloadSummary {
            vertices_visited: 0,
            vertices_reloaded: 0,
            regions_written: 0,
            image_dir,
            report_dir,
        };

        for vertex in vertices.iter_mut() {
            summary.vertices_visited += 1;
            let label = vertex.label().to_string();
            let Some(reloadable) = vertex.as_reloadable_mut() else {
                continue;
            };
            if !reloadable.requires_regions_to_be_reloaded() {
                continue;
            }
            let core = placements
                .placement_of(&label)
                .ok_or(HostError::VertexNotPlaced { label: label.clone() })?;

            let request = reloadable.regions_to_rewrite(ctx)?;
            let executed = self.executor.execute(&request.spec)?;
            let declared: Vec<(u8, u32, &str)> = executed
                .regions()
                .map(|r| (r.id, r.size, r.label.as_str()))
                .collect();
            self.writer.reserve_regions(core, &declared)?;

            let mut written = Vec::with_capacity(request.regions.len());
            let mut outcome = Ok(());
            for &region in &request.regions {
                let step = self.reload_region(core, region, &executed, &summary);
                match step {
                    Ok(()) => written.push(region),
                    Err(e) => {
                        outcome = Err(e);
                        break;
                    }
                }
            }
            reloadable.mark_regions_reloaded(&written);
            summary.regions_written += written.len();
            if !written.is_empty() {
                summary.vertices_reloaded += 1;
            }
            if let Err(e) = outcome {
                warn!("Reload of {label} on {core} stopped after {} regions: {e}", written.len());
                return Err(e);
            }
            debug!("Reloaded {} regions of {label} on {core}", written.len());
        }

        info!(
            "Reload pass: {} vertices visited, {} reloaded, {} regions written",
            summary.vertices_visited, summary.vertices_reloaded, summary.regions_written
        );
        Ok(summary)
    }

    fn reload_region(
        &self,
        core: ChipAddress,
        region: u8,
        executed: &ExecutedSpecification,
        summary: &ReloadSummary,
    ) -> Result<()> {
        let image = executed.image(region).ok_or_else(|| {
            HostError::specification(format!("region {region} to rewrite is not reserved"))
        })?;
        self.writer.write_image(core, image, self.locator)?;

        let stem = artifact_stem(&self.config.hostname, core, region);
        fs::write(summary.image_dir.join(format!("{stem}.dat")), &image.data)?;
        if self.config.write_text_specs {
            fs::write(
                summary.report_dir.join(format!("{stem}.txt")),
                executed.render_text(),
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn unique_folder_suffixes_taken_names() {
        let dir = TempDir::new().unwrap();
        let first = unique_folder(dir.path(), RELOAD_FOLDER).unwrap();
        let second = unique_folder(dir.path(), RELOAD_FOLDER).unwrap();
        let third = unique_folder(dir.path(), RELOAD_FOLDER).unwrap();
        assert_eq!(first, dir.path().join("reloaded_data_regions"));
        assert_eq!(second, dir.path().join("reloaded_data_regions_1"));
        assert_eq!(third, dir.path().join("reloaded_data_regions_2"));
        assert!(third.is_dir());
    }

    #[test]
    fn artifact_names() {
        let core = ChipAddress::new(1, 2, 3).unwrap();
        assert_eq!(artifact_stem("board", core, 4), "board_dataSpec_1_2_3_4");
    }
}
