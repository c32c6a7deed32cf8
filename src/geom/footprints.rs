use anyhow::{Result, ensure};
use geo::{
    Area, BoundingRect, Centroid, ConvexHull, Distance, Euclidean, Intersects, MultiPolygon,
    Point, Polygon, Rect,
};
use rstar::{AABB, RTree, RTreeObject};

use super::proj;

/// An R-tree entry: the bounding rectangle of one footprint, tagged with its
/// row index.
#[derive(Debug, Clone)]
struct FootprintEnvelope {
    idx: usize,
    rect: Rect<f64>,
}

impl RTreeObject for FootprintEnvelope {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        AABB::from_corners(
            [self.rect.min().x, self.rect.min().y],
            [self.rect.max().x, self.rect.max().y],
        )
    }
}

/// Building footprints with a spatial index, pinned to one EPSG frame.
///
/// The index holds bounding boxes only; every spatial predicate runs an exact
/// geometry test on the prefiltered candidates.
#[derive(Debug, Clone)]
pub struct Footprints {
    shapes: Vec<MultiPolygon<f64>>,
    rtree: RTree<FootprintEnvelope>,
    epsg: u32,
}

impl Footprints {
    pub fn new(shapes: Vec<MultiPolygon<f64>>, epsg: u32) -> Self {
        let envelopes = shapes
            .iter()
            .enumerate()
            .filter_map(|(idx, shape)| {
                shape
                    .bounding_rect()
                    .map(|rect| FootprintEnvelope { idx, rect })
            })
            .collect();
        Self {
            shapes,
            rtree: RTree::bulk_load(envelopes),
            epsg,
        }
    }

    pub fn len(&self) -> usize {
        self.shapes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shapes.is_empty()
    }

    pub fn epsg(&self) -> u32 {
        self.epsg
    }

    pub fn shapes(&self) -> &[MultiPolygon<f64>] {
        &self.shapes
    }

    /// The same footprints in another EPSG frame, reindexed.
    pub fn reprojected(&self, to_epsg: u32) -> Result<Self> {
        Ok(Self::new(
            proj::reproject(&self.shapes, self.epsg, to_epsg)?,
            to_epsg,
        ))
    }

    /// Footprint areas in the squared unit of the current frame.
    pub fn areas(&self) -> Vec<f64> {
        self.shapes.iter().map(|s| s.unsigned_area()).collect()
    }

    /// Footprint centroids; NaN coordinates for empty geometries.
    pub fn centroids(&self) -> Vec<Point<f64>> {
        self.shapes
            .iter()
            .map(|s| s.centroid().unwrap_or(Point::new(f64::NAN, f64::NAN)))
            .collect()
    }

    /// For each footprint, the number of footprints within `tol` of it, the
    /// footprint itself included.
    pub fn neighbor_counts(&self, tol: f64) -> Vec<usize> {
        self.shapes
            .iter()
            .map(|shape| {
                let Some(rect) = shape.bounding_rect() else {
                    return 0;
                };
                let search = AABB::from_corners(
                    [rect.min().x - tol, rect.min().y - tol],
                    [rect.max().x + tol, rect.max().y + tol],
                );
                self.rtree
                    .locate_in_envelope_intersecting(&search)
                    .filter(|candidate| {
                        within_distance(shape, &self.shapes[candidate.idx], tol)
                    })
                    .count()
            })
            .collect()
    }

    /// Row indices of footprints that intersect `shape`, ascending.
    pub fn intersecting(&self, shape: &MultiPolygon<f64>) -> Vec<usize> {
        let Some(rect) = shape.bounding_rect() else {
            return Vec::new();
        };
        let search = AABB::from_corners(
            [rect.min().x, rect.min().y],
            [rect.max().x, rect.max().y],
        );
        let mut hits: Vec<usize> = self
            .rtree
            .locate_in_envelope_intersecting(&search)
            .filter(|candidate| self.shapes[candidate.idx].intersects(shape))
            .map(|candidate| candidate.idx)
            .collect();
        hits.sort_unstable();
        hits
    }

    /// Row index of the first footprint containing `point`.
    pub fn containing(&self, point: Point<f64>) -> Option<usize> {
        let search = AABB::from_point([point.x(), point.y()]);
        let mut hits: Vec<usize> = self
            .rtree
            .locate_in_envelope_intersecting(&search)
            .filter(|candidate| self.shapes[candidate.idx].intersects(&point))
            .map(|candidate| candidate.idx)
            .collect();
        hits.sort_unstable();
        hits.first().copied()
    }

    /// Footprints selected by row index, duplicates allowed.
    pub fn take(&self, indices: &[usize]) -> Self {
        Self::new(
            indices.iter().map(|&i| self.shapes[i].clone()).collect(),
            self.epsg,
        )
    }

    /// Both footprint sets, which must share a frame, as one.
    pub fn concat(&self, other: &Footprints) -> Result<Self> {
        ensure!(
            self.epsg == other.epsg,
            "cannot combine footprints across frames: EPSG:{} vs EPSG:{}",
            self.epsg,
            other.epsg
        );
        let mut shapes = self.shapes.clone();
        shapes.extend_from_slice(&other.shapes);
        Ok(Self::new(shapes, self.epsg))
    }

    /// Convex hull around all footprints, e.g. for clipping weather rasters
    /// to the covered area.
    pub fn hull(&self) -> Polygon<f64> {
        let combined = MultiPolygon(
            self.shapes
                .iter()
                .flat_map(|mp| mp.0.iter().cloned())
                .collect::<Vec<_>>(),
        );
        combined.convex_hull()
    }

    /// Bounding rectangle of all footprints.
    pub fn bounds(&self) -> Option<Rect<f64>> {
        let combined = MultiPolygon(
            self.shapes
                .iter()
                .flat_map(|mp| mp.0.iter().cloned())
                .collect::<Vec<_>>(),
        );
        combined.bounding_rect()
    }
}

/// True when the two footprints intersect or lie within `tol` of each other.
fn within_distance(a: &MultiPolygon<f64>, b: &MultiPolygon<f64>, tol: f64) -> bool {
    if a.intersects(b) {
        return true;
    }
    b.0.iter().any(|part| Euclidean.distance(a, part) <= tol)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geom::METRIC_EPSG;
    use crate::geom::testutil::rect;
    use geo::Contains;

    #[test]
    fn neighbor_counts_find_attached_footprints() {
        // A stands alone, B and C share an edge, D is 0.05 m from C.
        let footprints = Footprints::new(
            vec![
                rect(0.0, 0.0, 10.0, 10.0),
                rect(100.0, 0.0, 110.0, 10.0),
                rect(110.0, 0.0, 120.0, 10.0),
                rect(120.05, 0.0, 130.0, 10.0),
            ],
            METRIC_EPSG,
        );
        assert_eq!(footprints.neighbor_counts(0.1), vec![1, 2, 3, 2]);
    }

    #[test]
    fn intersecting_prefilters_then_tests_exactly() {
        let footprints = Footprints::new(
            vec![rect(0.0, 0.0, 10.0, 10.0), rect(20.0, 0.0, 30.0, 10.0)],
            METRIC_EPSG,
        );
        let probe = rect(5.0, 5.0, 25.0, 6.0);
        assert_eq!(footprints.intersecting(&probe), vec![0, 1]);
        assert_eq!(footprints.intersecting(&rect(11.0, 0.0, 19.0, 10.0)), Vec::<usize>::new());
    }

    #[test]
    fn containing_picks_the_first_match() {
        let footprints = Footprints::new(
            vec![rect(0.0, 0.0, 10.0, 10.0), rect(5.0, 0.0, 15.0, 10.0)],
            METRIC_EPSG,
        );
        assert_eq!(footprints.containing(Point::new(7.0, 5.0)), Some(0));
        assert_eq!(footprints.containing(Point::new(12.0, 5.0)), Some(1));
        assert_eq!(footprints.containing(Point::new(50.0, 50.0)), None);
    }

    #[test]
    fn hull_covers_every_footprint() {
        let footprints = Footprints::new(
            vec![rect(0.0, 0.0, 1.0, 1.0), rect(10.0, 10.0, 11.0, 11.0)],
            METRIC_EPSG,
        );
        let hull = footprints.hull();
        assert!(hull.contains(&Point::new(5.0, 5.0)));
    }
}
