//! Bound arithmetic.
//!
//! Every structural mutation is expressed as a [`BoundPatch`]: a predicate selecting the rows
//! to touch plus the per-column rewrite to apply. The same descriptor is evaluated in memory by
//! [`crate::MemoryStore`] and compiled to `UPDATE ... SET col = CASE ...` by the SQL backends.
//! Left and right columns are patched identically; depth only changes inside a moved subtree.

use crate::error::{Error, Result};
use crate::node::Bounds;

/// Opens (`height > 0`) or closes (`height < 0`) a uniform gap at `cut`.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct GapPatch {
    pub cut: i64,
    pub height: i64,
}

impl GapPatch {
    pub fn patch(&self, bound: i64) -> i64 {
        if bound >= self.cut {
            bound + self.height
        } else {
            bound
        }
    }

    pub fn selects(&self, left: i64, right: i64) -> bool {
        left >= self.cut || right >= self.cut
    }
}

/// Relocates the subtree `[lft, rgt]` by `distance` while the band `[from, to]` it crosses
/// shifts by `height` in the opposite direction.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct MovePatch {
    pub lft: i64,
    pub rgt: i64,
    pub from: i64,
    pub to: i64,
    pub height: i64,
    pub distance: i64,
    pub depth: i64,
}

impl MovePatch {
    pub fn patch(&self, bound: i64) -> i64 {
        if (self.lft..=self.rgt).contains(&bound) {
            bound + self.distance
        } else if (self.from..=self.to).contains(&bound) {
            bound + self.height
        } else {
            bound
        }
    }

    /// `left` is the row's bound before the patch.
    pub fn patch_depth(&self, left: i64, depth: i64) -> i64 {
        if (self.lft..=self.rgt).contains(&left) {
            depth + self.depth
        } else {
            depth
        }
    }

    pub fn selects(&self, left: i64, right: i64) -> bool {
        (self.from..=self.to).contains(&left) || (self.from..=self.to).contains(&right)
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum BoundPatch {
    Gap(GapPatch),
    Move(MovePatch),
}

impl BoundPatch {
    /// Whether a row with these bounds is affected by the patch.
    pub fn selects(&self, left: i64, right: i64) -> bool {
        match self {
            BoundPatch::Gap(gap) => gap.selects(left, right),
            BoundPatch::Move(mv) => mv.selects(left, right),
        }
    }

    pub fn patch_bound(&self, bound: i64) -> i64 {
        match self {
            BoundPatch::Gap(gap) => gap.patch(bound),
            BoundPatch::Move(mv) => mv.patch(bound),
        }
    }

    pub fn patch_depth(&self, left: i64, depth: i64) -> i64 {
        match self {
            BoundPatch::Gap(_) => depth,
            BoundPatch::Move(mv) => mv.patch_depth(left, depth),
        }
    }

    /// Whether the patch rewrites the depth column at all.
    pub fn touches_depth(&self) -> bool {
        matches!(self, BoundPatch::Move(mv) if mv.depth != 0)
    }

    pub fn apply(&self, bounds: Bounds) -> Bounds {
        Bounds {
            left: self.patch_bound(bounds.left),
            right: self.patch_bound(bounds.right),
            depth: self.patch_depth(bounds.left, bounds.depth),
        }
    }
}

pub fn gap_patch(cut: i64, height: i64) -> BoundPatch {
    BoundPatch::Gap(GapPatch { cut, height })
}

pub fn move_patch(
    lft: i64,
    rgt: i64,
    from: i64,
    to: i64,
    height: i64,
    distance: i64,
    depth_delta: i64,
) -> BoundPatch {
    BoundPatch::Move(MovePatch {
        lft,
        rgt,
        from,
        to,
        height,
        distance,
        depth: depth_delta,
    })
}

/// Compute the patch that moves the subtree `source` so its left bound lands on `position`.
///
/// `target_depth` is the depth the subtree root will have at its destination. Returns `None`
/// when the subtree already sits at `position`.
pub fn plan_move(source: Bounds, position: i64, target_depth: i64) -> Result<Option<MovePatch>> {
    let Bounds {
        left: lft,
        right: rgt,
        depth,
    } = source;

    if position < 1 {
        return Err(Error::InvalidMove(format!("position {position} is out of range")));
    }
    if lft < position && position <= rgt {
        return Err(Error::InvalidMove(format!(
            "position {position} lies inside the subtree [{lft}, {rgt}]"
        )));
    }

    let from = lft.min(position);
    let to = rgt.max(position - 1);
    let mut height = rgt - lft + 1;
    let mut distance = to - from + 1 - height;

    if distance == 0 {
        return Ok(None);
    }

    // Forward: the band closes behind the subtree. Backward: the subtree travels down.
    if position > lft {
        height = -height;
    } else {
        distance = -distance;
    }

    Ok(Some(MovePatch {
        lft,
        rgt,
        from,
        to,
        height,
        distance,
        depth: target_depth - depth,
    }))
}
