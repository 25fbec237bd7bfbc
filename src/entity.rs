//! Restaurant-name to hotel resolution. A bare restaurant alias like "아리아" identifies
//! a specific hotel's dining venue; this module decides whether the request can proceed
//! as-is, should be redirected to the correct hotel, or needs a clarifying question when
//! the alias is ambiguous across properties. Grounded in `rag/entity.py`.

use crate::constants::{hotel_name, RESTAURANT_ALIAS_INDEX};
use crate::state::{RestaurantAction, RestaurantEntity};

/// Strips a parenthetical disambiguator from a restaurant's display name, e.g.
/// "아리아(부산)" → "아리아".
fn clean_restaurant_name(name: &str) -> &str {
    match name.find('(') {
        Some(idx) => name[..idx].trim_end(),
        None => name,
    }
}

/// Resolves a restaurant mention in `query` against the known alias index. Longest
/// alias wins; matches local to `current_hotel` proceed unchanged; a match confined to
/// exactly one other hotel redirects; two or more candidate hotels ask for
/// clarification.
pub fn resolve(query: &str, current_hotel: Option<&str>) -> RestaurantEntity {
    let lower = query.to_lowercase();

    let mut aliases: Vec<&&str> = RESTAURANT_ALIAS_INDEX.keys().collect();
    aliases.sort_by_key(|a| std::cmp::Reverse(a.chars().count()));

    let Some(alias) = aliases.into_iter().find(|a| lower.contains(**a)) else {
        return RestaurantEntity { action: Some(RestaurantAction::Proceed), ..Default::default() };
    };

    let matches = &RESTAURANT_ALIAS_INDEX[alias];

    if let Some(current) = current_hotel {
        if matches.iter().any(|m| m.hotel_id == current) {
            return RestaurantEntity {
                action: Some(RestaurantAction::Proceed),
                matched_alias: Some(alias.to_string()),
                matched_hotels: matches.iter().map(|m| m.hotel_id.to_string()).collect(),
                ..Default::default()
            };
        }
    }

    let other_matches: Vec<_> = matches
        .iter()
        .filter(|m| current_hotel.map(|h| m.hotel_id != h).unwrap_or(true))
        .collect();

    let mut unique_hotels: Vec<&str> = Vec::new();
    for m in &other_matches {
        if !unique_hotels.contains(&m.hotel_id) {
            unique_hotels.push(m.hotel_id);
        }
    }

    if unique_hotels.len() == 1 {
        let target = unique_hotels[0];
        let restaurant = other_matches[0].restaurant;
        let display_name = clean_restaurant_name(restaurant);
        let target_name = hotel_name(target);
        RestaurantEntity {
            action: Some(RestaurantAction::Redirect),
            matched_alias: Some(alias.to_string()),
            matched_hotels: vec![target.to_string()],
            redirect_hotel: Some(target.to_string()),
            message: Some(format!("{display_name}은(는) {target_name}에 위치한 레스토랑입니다.")),
            clarify_options: Vec::new(),
        }
    } else if unique_hotels.len() >= 2 {
        let restaurant = other_matches[0].restaurant;
        let display_name = clean_restaurant_name(restaurant);
        let hotel_names: Vec<&str> = unique_hotels.iter().map(|h| hotel_name(h)).collect();
        let hotel_list = hotel_names.join(", ");
        RestaurantEntity {
            action: Some(RestaurantAction::Clarify),
            matched_alias: Some(alias.to_string()),
            matched_hotels: unique_hotels.iter().map(|s| s.to_string()).collect(),
            redirect_hotel: None,
            message: Some(format!(
                "{display_name}은(는) {hotel_list}에 있습니다. 어느 호텔의 {display_name}을(를) 안내해 드릴까요?"
            )),
            clarify_options: hotel_names.into_iter().map(str::to_string).collect(),
        }
    } else {
        RestaurantEntity {
            action: Some(RestaurantAction::Proceed),
            matched_alias: Some(alias.to_string()),
            matched_hotels: matches.iter().map(|m| m.hotel_id.to_string()).collect(),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_alias_match_proceeds() {
        let result = resolve("체크인 시간 알려줘", None);
        assert_eq!(result.action, Some(RestaurantAction::Proceed));
        assert!(result.matched_alias.is_none());
    }

    #[test]
    fn test_matches_current_hotel_proceeds() {
        let result = resolve("아리아 메뉴 알려줘", Some("grand_josun_busan"));
        assert_eq!(result.action, Some(RestaurantAction::Proceed));
    }

    #[test]
    fn test_redirect_to_single_other_hotel() {
        let result = resolve("아리아 메뉴 알려줘", Some("josun_palace"));
        assert_eq!(result.action, Some(RestaurantAction::Redirect));
        assert_eq!(result.redirect_hotel.as_deref(), Some("grand_josun_busan"));
        assert!(result.message.unwrap().contains("그랜드 조선 부산"));
    }

    #[test]
    fn test_clean_restaurant_name_strips_parenthetical() {
        assert_eq!(clean_restaurant_name("아리아(부산)"), "아리아");
        assert_eq!(clean_restaurant_name("홍연"), "홍연");
    }
}
