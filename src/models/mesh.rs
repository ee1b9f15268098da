//! Semantic body-map specifications and their channel counts.

use std::collections::HashMap;

use lazy_static::lazy_static;

use crate::error::{ModelError, ModelResult};

lazy_static! {
    static ref MAP_FN_DIMS: HashMap<&'static str, usize> = {
        let mut dims = HashMap::new();
        // part id per face
        dims.insert("ids", 1);
        // binary foreground segmentation
        dims.insert("seg", 1);
        // UV coordinates
        dims.insert("uv", 2);
        // UV coordinates plus segmentation
        dims.insert("uv_seg", 3);
        // one-hot body parts
        dims.insert("par", 14);
        dims
    };
}

/// Number of conditioning channels a semantic map contributes.
pub fn map_fn_dim(map_name: &str) -> ModelResult<usize> {
    MAP_FN_DIMS
        .get(map_name)
        .copied()
        .ok_or_else(|| ModelError::UnknownMapName(map_name.to_string()))
}

/// Names accepted by [`map_fn_dim`], sorted.
pub fn map_names() -> Vec<&'static str> {
    let mut names: Vec<&'static str> = MAP_FN_DIMS.keys().copied().collect();
    names.sort_unstable();
    names
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_maps() {
        assert_eq!(map_fn_dim("uv_seg").unwrap(), 3);
        assert_eq!(map_fn_dim("par").unwrap(), 14);
        assert_eq!(map_names(), vec!["ids", "par", "seg", "uv", "uv_seg"]);
    }

    #[test]
    fn test_unknown_map() {
        assert!(matches!(
            map_fn_dim("depth"),
            Err(ModelError::UnknownMapName(name)) if name == "depth"
        ));
    }
}
