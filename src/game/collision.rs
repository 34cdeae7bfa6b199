//! Axis-aligned collision tests between birds, pipes and the world bounds

use super::lane::{Pipe, PIPE_HALF_WIDTH};
use super::physics::{BIRD_HALF_HEIGHT, BIRD_HALF_WIDTH};

/// Returns true if a bird centered at (x, y) hits any pipe or leaves the world vertically
pub fn collides<'a, I>(x: f32, y: f32, pipes: I, world_height: f32) -> bool
where
    I: IntoIterator<Item = &'a Pipe>,
{
    out_of_bounds(y, world_height) || pipes.into_iter().any(|pipe| hits_pipe(x, y, pipe))
}

/// Bird overlaps the pipe horizontally and is not fully inside its gap
pub fn hits_pipe(x: f32, y: f32, pipe: &Pipe) -> bool {
    let overlaps_x =
        x + BIRD_HALF_WIDTH > pipe.x - PIPE_HALF_WIDTH && x - BIRD_HALF_WIDTH < pipe.x + PIPE_HALF_WIDTH;
    if !overlaps_x {
        return false;
    }

    let (gap_top, gap_bottom) = pipe.gap_bounds();
    let inside_gap = y - BIRD_HALF_HEIGHT > gap_top && y + BIRD_HALF_HEIGHT < gap_bottom;
    !inside_gap
}

/// Bird touches the ceiling or the floor
pub fn out_of_bounds(y: f32, world_height: f32) -> bool {
    y - BIRD_HALF_HEIGHT < 0.0 || y + BIRD_HALF_HEIGHT > world_height
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::physics::WORLD_HEIGHT;

    fn pipe_at(x: f32) -> Pipe {
        Pipe::new(1, x, 300.0, 150.0)
    }

    #[test]
    fn bird_outside_gap_collides() {
        let pipes = vec![pipe_at(150.0)];
        assert!(collides(150.0, 200.0, &pipes, WORLD_HEIGHT));
    }

    #[test]
    fn bird_inside_gap_passes() {
        let pipes = vec![pipe_at(150.0)];
        assert!(!collides(150.0, 300.0, &pipes, WORLD_HEIGHT));
    }

    #[test]
    fn gap_edges_are_exclusive() {
        // Gap spans 225..375, bird half height 12
        let pipe = pipe_at(150.0);
        assert!(hits_pipe(150.0, 237.0, &pipe));
        assert!(!hits_pipe(150.0, 237.5, &pipe));
        assert!(hits_pipe(150.0, 363.0, &pipe));
    }

    #[test]
    fn no_horizontal_overlap_means_no_hit() {
        // Combined half widths are 48
        assert!(!hits_pipe(150.0, 0.0 + 100.0, &pipe_at(198.0)));
        assert!(hits_pipe(150.0, 100.0, &pipe_at(197.0)));
    }

    #[test]
    fn world_bounds() {
        let none: Vec<Pipe> = Vec::new();
        assert!(collides(150.0, 11.0, &none, WORLD_HEIGHT));
        assert!(collides(150.0, 589.0, &none, WORLD_HEIGHT));
        assert!(!collides(150.0, 12.0, &none, WORLD_HEIGHT));
        assert!(!collides(150.0, 588.0, &none, WORLD_HEIGHT));
    }

    #[test]
    fn result_is_independent_of_pipe_order() {
        let a = vec![pipe_at(400.0), pipe_at(150.0)];
        let b = vec![pipe_at(150.0), pipe_at(400.0)];
        for y in [50.0, 200.0, 300.0, 500.0] {
            let first = collides(150.0, y, &a, WORLD_HEIGHT);
            assert_eq!(first, collides(150.0, y, &b, WORLD_HEIGHT));
            assert_eq!(first, collides(150.0, y, &a, WORLD_HEIGHT));
        }
    }
}
