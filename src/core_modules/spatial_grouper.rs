// THEORY:
// The `spatial_grouper` is the engine of the optional grouping layer. A single
// physical spot often breaks into several contours after thresholding (uneven
// staining, a highlight across the middle). This module folds such fragments back
// together by proximity.
//
// Algorithm steps:
// 1.  **Seeding**: each region contributes its area-moment centroid. Regions whose
//     zeroth moment is zero have no centroid and are left out.
// 2.  **Density-Based Growth**: starting from the first unvisited centroid, a
//     breadth-first search absorbs every centroid within `merge_radius` of any
//     member already in the cluster. With a minimum cluster size of one there is no
//     noise class: every centroid ends up in exactly one cluster.
// 3.  **Merging**: each cluster becomes one `MergedRegion` whose outline is the
//     convex hull of all member boundary points, so its area is at least that of
//     its largest member.
// 4.  **Stateless Utility**: like the extractor, the grouper has no memory of
//     earlier frames.
//
// Growing the radius can only join clusters, never split them, because the
// "within radius" graph at a larger radius is a supergraph of the smaller one.

use crate::core_modules::region::{MergedRegion, Point, Region, polygon_area};
use crate::error::{Result, SpotError};
use imageproc::geometry::convex_hull;
use std::collections::VecDeque;

/// The clusters found for one set of regions.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Grouping {
    /// One merged region per cluster, in order of each cluster's first member.
    pub merged: Vec<MergedRegion>,
}

impl Grouping {
    pub fn cluster_count(&self) -> usize {
        self.merged.len()
    }

    /// Number of member regions per cluster, aligned with `merged`.
    pub fn member_counts(&self) -> Vec<usize> {
        self.merged.iter().map(|m| m.member_count).collect()
    }

    pub fn total_area(&self) -> f64 {
        self.merged.iter().map(|m| m.area).sum()
    }
}

pub fn validate_merge_radius(radius: f64) -> Result<()> {
    if radius.is_finite() && radius >= 0.0 {
        Ok(())
    } else {
        Err(SpotError::configuration(
            "merge_radius",
            format!("must be a non-negative number, got {radius}"),
        ))
    }
}

pub mod spatial_grouper {
    use super::*;

    /// Clusters the centroids and returns, per cluster, the indices of its members.
    pub fn cluster_centroids(centroids: &[(f64, f64)], merge_radius: f64) -> Vec<Vec<usize>> {
        let radius_sq = merge_radius * merge_radius;
        let mut visited = vec![false; centroids.len()];
        let mut clusters = Vec::new();

        for seed in 0..centroids.len() {
            if visited[seed] {
                continue;
            }
            visited[seed] = true;
            let mut members = Vec::new();
            let mut queue = VecDeque::from([seed]);

            while let Some(current) = queue.pop_front() {
                members.push(current);
                let (cx, cy) = centroids[current];
                for (other, &(ox, oy)) in centroids.iter().enumerate() {
                    if visited[other] {
                        continue;
                    }
                    let dist_sq = (cx - ox).powi(2) + (cy - oy).powi(2);
                    if dist_sq <= radius_sq {
                        visited[other] = true;
                        queue.push_back(other);
                    }
                }
            }

            members.sort_unstable();
            clusters.push(members);
        }

        clusters
    }

    /// Groups regions whose centroids chain within `merge_radius` and merges each group.
    pub fn group_regions(regions: &[Region], merge_radius: f64) -> Grouping {
        // Only regions with a defined centroid take part.
        let candidates: Vec<&Region> = regions.iter().filter(|r| r.area > 0.0).collect();
        let centroids: Vec<(f64, f64)> = candidates.iter().map(|r| r.centroid).collect();

        let merged = cluster_centroids(&centroids, merge_radius)
            .into_iter()
            .map(|members| {
                let member_regions: Vec<&Region> = members.iter().map(|&i| candidates[i]).collect();
                merge(&member_regions)
            })
            .collect();

        Grouping { merged }
    }

    fn merge(members: &[&Region]) -> MergedRegion {
        let points: Vec<imageproc::point::Point<i32>> = members
            .iter()
            .flat_map(|r| r.points.iter().copied().map(Into::into))
            .collect();
        let hull: Vec<Point> = convex_hull(&points[..]).into_iter().map(Point::from).collect();

        let n = members.len() as f64;
        let center = members.iter().fold((0.0, 0.0), |acc, r| {
            (acc.0 + r.centroid.0 / n, acc.1 + r.centroid.1 / n)
        });

        MergedRegion {
            area: polygon_area(&hull),
            hull,
            member_count: members.len(),
            center,
        }
    }
}
