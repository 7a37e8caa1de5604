//! 响应解析：宽松提取，严格校验
//!
//! 整体不是合法 JSON 时拒绝整个响应；单个条目校验失败只丢弃该条目。
//! 全部条目都被丢弃时返回 [`OracleError::NoValidSuggestions`]。

use glam::{Quat, Vec3};
use serde_json::Value;

use super::OracleError;
use crate::animation::{Interpolation, KeyValue, Keyframe, TrackProperty};
use crate::skeleton::{BoneId, Skeleton};
use crate::suggestion::BoneSuggestion;

/// 从可能夹杂说明文字的响应中提取 JSON 文本
///
/// 依次尝试：整体解析、代码块内容、文中第一个可解析的配平 `{...}`（其次 `[...]`）。
pub fn extract_json(text: &str) -> Option<&str> {
    let trimmed = text.trim();
    if serde_json::from_str::<Value>(trimmed).is_ok() {
        return Some(trimmed);
    }

    if let Some(start) = trimmed.find("```") {
        let body = &trimmed[start + 3..];
        let body = body.find('\n').map_or(body, |nl| &body[nl + 1..]);
        if let Some(end) = body.find("```") {
            let block = body[..end].trim();
            if serde_json::from_str::<Value>(block).is_ok() {
                return Some(block);
            }
        }
    }

    // 说明文字里可能有非 JSON 的括号：逐个起点尝试，对象优先于数组
    ['{', '['].into_iter().find_map(|open| {
        trimmed
            .match_indices(open)
            .filter_map(|(i, _)| balanced(&trimmed[i..]))
            .find(|candidate| serde_json::from_str::<Value>(candidate).is_ok())
    })
}

/// 从开括号开始找到配平的结尾（忽略字符串内的括号）
fn balanced(text: &str) -> Option<&str> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (i, c) in text.char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' | '[' => depth += 1,
            '}' | ']' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(&text[..=i]);
                }
            }
            _ => {}
        }
    }
    None
}

fn parse_value(text: &str) -> Result<Value, OracleError> {
    let json = extract_json(text).ok_or_else(|| OracleError::Malformed("no JSON object found".to_string()))?;
    serde_json::from_str(json).map_err(|e| OracleError::Malformed(e.to_string()))
}

/// 取出对象中的数组字段，或直接是数组
fn entries<'a>(value: &'a Value, key: &str) -> Result<&'a Vec<Value>, OracleError> {
    match value {
        Value::Array(items) => Ok(items),
        Value::Object(map) => map
            .get(key)
            .and_then(Value::as_array)
            .ok_or_else(|| OracleError::Malformed(format!("missing \"{key}\" array"))),
        _ => Err(OracleError::Malformed("expected object or array".to_string())),
    }
}

fn finite(value: &Value) -> Option<f32> {
    let v = value.as_f64()? as f32;
    v.is_finite().then_some(v)
}

/// `[x, y, z]` 或 `{"x":..,"y":..,"z":..}`
fn parse_vec3(value: &Value) -> Option<Vec3> {
    match value {
        Value::Array(items) if items.len() == 3 => {
            Some(Vec3::new(finite(&items[0])?, finite(&items[1])?, finite(&items[2])?))
        }
        Value::Object(map) => Some(Vec3::new(
            finite(map.get("x")?)?,
            finite(map.get("y")?)?,
            finite(map.get("z")?)?,
        )),
        _ => None,
    }
}

fn parse_numbers(value: &Value) -> Option<Vec<f32>> {
    value.as_array()?.iter().map(finite).collect()
}

/// 解析骨骼建议
///
/// 父索引必须指向列表中更早的条目；指向被丢弃条目的父索引
/// 重新挂到最近的保留祖先上。
pub fn parse_bone_suggestions(text: &str) -> Result<Vec<BoneSuggestion>, OracleError> {
    let value = parse_value(text)?;
    let items = entries(&value, "bones")?;

    let raw_parents: Vec<Option<usize>> = items
        .iter()
        .enumerate()
        .map(|(i, item)| raw_parent_index(item).filter(|&p| p < i))
        .collect();

    let mut new_index: Vec<Option<usize>> = vec![None; items.len()];
    let mut result = Vec::new();
    for (i, item) in items.iter().enumerate() {
        let Some(mut suggestion) = parse_bone_entry(i, item) else {
            log::warn!("丢弃无效的骨骼建议条目 {}: {}", i, item);
            continue;
        };
        let mut resolved = None;
        let mut ancestor = raw_parents[i];
        while let Some(p) = ancestor {
            if let Some(mapped) = new_index[p] {
                resolved = Some(mapped);
                break;
            }
            ancestor = raw_parents[p];
        }
        suggestion.parent_index = resolved;
        new_index[i] = Some(result.len());
        result.push(suggestion);
    }

    if result.is_empty() {
        return Err(OracleError::NoValidSuggestions);
    }
    Ok(result)
}

fn parent_field(item: &Value) -> Option<&Value> {
    item.get("parentIndex").or_else(|| item.get("parent_index"))
}

fn raw_parent_index(item: &Value) -> Option<usize> {
    parent_field(item)?.as_u64().map(|p| p as usize)
}

/// 单个条目：名称非空、位置有限、父索引为空或指向更早的条目
fn parse_bone_entry(index: usize, item: &Value) -> Option<BoneSuggestion> {
    let name = item.get("name")?.as_str()?.trim();
    if name.is_empty() {
        return None;
    }
    let position = parse_vec3(item.get("position")?)?;
    match parent_field(item) {
        None | Some(Value::Null) => {}
        Some(v) => {
            let p = v.as_u64()? as usize;
            if p >= index {
                return None;
            }
        }
    }
    let confidence = match item.get("confidence") {
        None | Some(Value::Null) => 0.5,
        Some(v) => finite(v)?.clamp(0.0, 1.0),
    };
    Some(BoneSuggestion {
        position,
        name: name.to_string(),
        parent_index: None,
        confidence,
    })
}

/// 解析后的动画关键帧
#[derive(Clone, Debug, PartialEq)]
pub struct SuggestedKeyframe {
    pub bone_id: BoneId,
    pub property: TrackProperty,
    pub keyframe: Keyframe,
}

/// 解析动画关键帧
///
/// 接受 `{"keyframes": [{bone, property, frame, value, interpolation}]}`
/// 或 `{"tracks": [{bone, property, keyframes: [...]}]}`。
/// 骨骼名不在当前骨架中的条目被丢弃并记录警告。
pub fn parse_keyframes(text: &str, skeleton: &Skeleton) -> Result<Vec<SuggestedKeyframe>, OracleError> {
    let value = parse_value(text)?;

    let mut flat: Vec<(Option<&Value>, Option<&Value>, &Value)> = Vec::new();
    match value.get("tracks").and_then(Value::as_array) {
        Some(tracks) => {
            for track in tracks {
                let keys = track.get("keyframes").and_then(Value::as_array);
                if keys.is_none() {
                    log::warn!("丢弃没有关键帧的轨道: {}", track);
                }
                for key in keys.into_iter().flatten() {
                    flat.push((track.get("bone"), track.get("property"), key));
                }
            }
        }
        None => {
            for key in entries(&value, "keyframes")? {
                flat.push((key.get("bone"), key.get("property"), key));
            }
        }
    }

    let mut result = Vec::new();
    for (bone, property, key) in flat {
        let Some(name) = bone.and_then(Value::as_str) else {
            log::warn!("丢弃缺少骨骼名的关键帧: {}", key);
            continue;
        };
        let Some(bone) = skeleton.find_by_name(name) else {
            log::warn!("骨骼 {} 不在当前骨架中，丢弃关键帧", name);
            continue;
        };
        match parse_keyframe_entry(property, key) {
            Some((property, keyframe)) => result.push(SuggestedKeyframe {
                bone_id: bone.id,
                property,
                keyframe,
            }),
            None => log::warn!("丢弃无效关键帧 ({}): {}", name, key),
        }
    }

    if result.is_empty() {
        return Err(OracleError::NoValidSuggestions);
    }
    Ok(result)
}

fn parse_keyframe_entry(property: Option<&Value>, key: &Value) -> Option<(TrackProperty, Keyframe)> {
    let property = match property?.as_str()? {
        "position" => TrackProperty::Position,
        "rotation" | "quaternion" => TrackProperty::Rotation,
        "scale" => TrackProperty::Scale,
        _ => return None,
    };
    let frame = u32::try_from(key.get("frame")?.as_u64()?).ok()?;
    let numbers = parse_numbers(key.get("value")?)?;
    let value = match (property, numbers.as_slice()) {
        (TrackProperty::Rotation, [x, y, z, w]) => {
            let q = Quat::from_xyzw(*x, *y, *z, *w);
            if q.length_squared() <= f32::EPSILON {
                return None;
            }
            KeyValue::Quat(q.normalize())
        }
        (TrackProperty::Position | TrackProperty::Scale, [x, y, z]) => KeyValue::Vec3(Vec3::new(*x, *y, *z)),
        _ => return None,
    };
    let interpolation = match key.get("interpolation") {
        None | Some(Value::Null) => Interpolation::Linear,
        Some(v) => serde_json::from_value(v.clone()).ok()?,
    };
    Some((
        property,
        Keyframe {
            frame,
            value,
            interpolation,
        },
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_json_from_prose() {
        let text = "Sure! Here is the rig:\n```json\n{\"bones\": []}\n```\nHope it helps.";
        assert_eq!(extract_json(text), Some("{\"bones\": []}"));

        let text = "Result: {\"a\": \"}{\", \"b\": [1, 2]} trailing";
        assert_eq!(extract_json(text), Some("{\"a\": \"}{\", \"b\": [1, 2]}"));

        assert_eq!(extract_json("no json here"), None);
        assert_eq!(extract_json("{\"unterminated\": 1"), None);
    }

    #[test]
    fn test_extract_json_skips_bracketed_prose() {
        let text = "Based on the mesh [height 2.0], here is the rig: {\"bones\": []}";
        assert_eq!(extract_json(text), Some("{\"bones\": []}"));

        let text = "Notes {draft} then [1, 2] and finally {\"a\": [3]} done";
        assert_eq!(extract_json(text), Some("{\"a\": [3]}"));

        assert_eq!(extract_json("no json {here} [or here]"), None);
    }

    #[test]
    fn test_bone_entries_validated_individually() {
        let text = r#"{"bones": [
            {"name": "root", "position": [0, 0, 0], "parentIndex": null, "confidence": 0.9},
            {"name": "bad", "position": [0, "x", 0], "parentIndex": 0},
            {"name": "spine", "position": {"x": 0, "y": 1, "z": 0}, "parentIndex": 0},
            {"name": "self", "position": [0, 2, 0], "parentIndex": 3},
            {"name": "child_of_bad", "position": [1, 1, 0], "parentIndex": 1},
            {"name": "forward", "position": [1, 1, 0], "parentIndex": 9}
        ]}"#;
        let bones = parse_bone_suggestions(text).unwrap();
        let names: Vec<&str> = bones.iter().map(|b| b.name.as_str()).collect();
        assert_eq!(names, vec!["root", "spine", "child_of_bad"]);
        assert_eq!(bones[1].parent_index, Some(0));
        // 父条目被丢弃，挂到最近的保留祖先
        assert_eq!(bones[2].parent_index, Some(0));
        assert_eq!(bones[1].confidence, 0.5);
    }

    #[test]
    fn test_no_valid_and_malformed() {
        assert_eq!(
            parse_bone_suggestions(r#"{"bones": [{"name": "", "position": [0,0,0]}]}"#),
            Err(OracleError::NoValidSuggestions)
        );
        assert!(matches!(parse_bone_suggestions("I can't help"), Err(OracleError::Malformed(_))));
        assert!(matches!(parse_bone_suggestions(r#"{"joints": []}"#), Err(OracleError::Malformed(_))));
    }

    #[test]
    fn test_keyframes_drop_unknown_bones() {
        let mut skeleton = Skeleton::new();
        let arm = skeleton.create_bone("arm", Vec3::ZERO, None).unwrap();
        let text = r#"Here you go: {"tracks": [
            {"bone": "arm", "property": "rotation", "keyframes": [
                {"frame": 0, "value": [0, 0, 0, 2]},
                {"frame": 10, "value": [0, 0.7071, 0, 0.7071], "interpolation": "bezier"},
                {"frame": -1, "value": [0, 0, 0, 1]}]},
            {"bone": "tail", "property": "position", "keyframes": [{"frame": 0, "value": [1, 2, 3]}]},
            {"bone": "arm", "property": "scale", "keyframes": [{"frame": 5, "value": [1, 1]}]}
        ]}"#;
        let keys = parse_keyframes(text, &skeleton).unwrap();
        assert_eq!(keys.len(), 2);
        assert!(keys.iter().all(|k| k.bone_id == arm && k.property == TrackProperty::Rotation));
        assert_eq!(keys[0].keyframe.value, KeyValue::Quat(Quat::IDENTITY));
        assert_eq!(keys[1].keyframe.interpolation, Interpolation::Bezier);

        let only_unknown = r#"{"keyframes": [{"bone": "tail", "property": "position", "frame": 0, "value": [0,0,0]}]}"#;
        assert_eq!(parse_keyframes(only_unknown, &skeleton), Err(OracleError::NoValidSuggestions));
    }
}
