use crate::config::value::RawValue;

/// Deep-merge `values` in order into a new map.
///
/// Maps are merged key by key; for every other pairing, lists included,
/// the later value replaces the earlier one. The inputs are left untouched.
pub fn deep_merge<'a>(values: impl IntoIterator<Item = &'a RawValue>) -> RawValue {
	let mut merged = RawValue::empty_map();
	for value in values {
		deep_merge_into(&mut merged, value);
	}
	merged
}

/// Deep-merge `overlay` into `base`, mutating only `base`.
pub fn deep_merge_into(base: &mut RawValue, overlay: &RawValue) {
	match (base, overlay) {
		(RawValue::Map(base_map), RawValue::Map(overlay_map)) => {
			for (key, value) in overlay_map {
				match base_map.get_mut(key) {
					Some(existing @ RawValue::Map(_)) => deep_merge_into(existing, value),
					_ => {
						base_map.insert(key.clone(), value.clone());
					}
				}
			}
		}
		(base, overlay) => *base = overlay.clone(),
	}
}
