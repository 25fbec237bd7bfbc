//! Code-embedded static configuration: hotel directory, keyword tables, synonym
//! dictionary, ambiguous-pattern table, context-clarification table, and the
//! restaurant alias index. Loaded once and immutable thereafter; every pattern here is
//! pre-compiled at first use via `once_cell::Lazy` and grouped by purpose.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::Regex;

#[derive(Debug, Clone)]
pub struct HotelInfo {
    pub key: &'static str,
    pub name: &'static str,
    pub phone: &'static str,
    pub location_url: &'static str,
    pub website: &'static str,
}

/// The fixed set of five hotel properties this assistant covers.
pub static HOTELS: &[HotelInfo] = &[
    HotelInfo {
        key: "josun_palace",
        name: "조선 팰리스",
        phone: "02-727-7200",
        location_url: "https://www.josunpalace.com/location",
        website: "https://www.josunpalace.com",
    },
    HotelInfo {
        key: "grand_josun_busan",
        name: "그랜드 조선 부산",
        phone: "051-922-5000",
        location_url: "https://www.thegrandjosun.com/busan/location",
        website: "https://www.thegrandjosun.com/busan",
    },
    HotelInfo {
        key: "grand_josun_jeju",
        name: "그랜드 조선 제주",
        phone: "064-735-7000",
        location_url: "https://www.thegrandjosun.com/jeju/location",
        website: "https://www.thegrandjosun.com/jeju",
    },
    HotelInfo {
        key: "lescape",
        name: "레스케이프",
        phone: "02-317-9000",
        location_url: "https://www.lescapehotel.com/location",
        website: "https://www.lescapehotel.com",
    },
    HotelInfo {
        key: "gravity",
        name: "그래비티 서울 판교",
        phone: "031-600-1000",
        location_url: "https://www.gravityseoul.com/location",
        website: "https://www.gravityseoul.com",
    },
];

pub fn hotel_info(key: &str) -> Option<&'static HotelInfo> {
    HOTELS.iter().find(|h| h.key == key)
}

pub fn hotel_name(key: &str) -> &'static str {
    hotel_info(key).map(|h| h.name).unwrap_or("")
}

pub fn hotel_phone(key: &str) -> &'static str {
    hotel_info(key).map(|h| h.phone).unwrap_or("호텔 고객센터")
}

/// Aliases used to detect a hotel mention in free text, longest-first priority handled
/// by the caller (`preprocess`).
pub static HOTEL_KEYWORDS: Lazy<HashMap<&'static str, Vec<&'static str>>> = Lazy::new(|| {
    HashMap::from([
        ("josun_palace", vec!["조선 팰리스", "josun palace", "팰리스"]),
        (
            "grand_josun_busan",
            vec!["그랜드 조선 부산", "부산 조선", "grand josun busan"],
        ),
        (
            "grand_josun_jeju",
            vec!["그랜드 조선 제주", "제주 조선", "grand josun jeju"],
        ),
        ("lescape", vec!["레스케이프", "lescape"]),
        ("gravity", vec!["그래비티", "gravity"]),
    ])
});

pub static CATEGORY_KEYWORDS: Lazy<HashMap<&'static str, Vec<&'static str>>> = Lazy::new(|| {
    HashMap::from([
        ("조식", vec!["조식", "아침식사", "breakfast", "뷔페"]),
        ("다이닝", vec!["레스토랑", "다이닝", "식당", "카페", "바", "라운지"]),
        ("수영장", vec!["수영장", "풀", "pool"]),
        ("피트니스", vec!["피트니스", "헬스", "gym"]),
        ("스파", vec!["스파", "spa", "사우나", "마사지"]),
        ("주차", vec!["주차", "발렛", "parking"]),
        ("체크인/아웃", vec!["체크인", "체크아웃", "checkin", "checkout"]),
        ("객실", vec!["객실", "방", "룸", "room", "스위트"]),
        ("요금/결제", vec!["요금", "가격", "결제", "비용"]),
        ("반려동물", vec!["반려동물", "애견", "강아지", "펫", "pet"]),
    ])
});

/// Topic groups used by `queryRewrite`'s topic-switch guard and `retrieve`'s
/// history-topic fallback. Order of keys is insertion order, used where priority among
/// "specific" vs "general" topics matters (rooms/dining/facilities before
/// location/transport/contact).
pub static TOPIC_GROUPS: Lazy<Vec<(&'static str, Vec<&'static str>)>> = Lazy::new(|| {
    vec![
        ("객실", vec!["객실", "방", "룸", "room", "suite", "스위트", "디럭스", "키즈룸"]),
        (
            "다이닝",
            vec!["레스토랑", "식당", "다이닝", "조식", "런치", "디너", "뷔페", "카페", "바"],
        ),
        (
            "시설",
            vec!["수영장", "풀", "피트니스", "헬스", "사우나", "스파", "키즈클럽"],
        ),
        ("교통", vec!["교통", "택시", "지하철", "버스", "공항", "셔틀", "리무진"]),
        ("주차", vec!["주차"]),
        ("반려동물", vec!["강아지", "반려", "펫", "pet", "개"]),
        ("예약", vec!["예약", "취소", "변경", "환불"]),
        ("체크인", vec!["체크인", "체크아웃", "입실", "퇴실"]),
        ("위치", vec!["위치", "주소", "어디", "오시는길", "찾아오"]),
        ("연락처", vec!["전화", "연락", "번호", "문의"]),
        ("웨딩", vec!["웨딩", "연회", "결혼"]),
    ]
});

/// Topics treated as general attributes rather than concrete subjects — these yield to
/// a specific topic when both match, mirroring the priority rule in `queryRewrite`.
pub static GENERAL_TOPICS: &[&str] = &["위치", "교통", "연락처"];

/// Canonical query-reinforcement phrase per topic, used by `retrieve` step 3.
pub static TOPIC_REINFORCEMENT: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    HashMap::from([
        ("조식", "조식"),
        ("다이닝", "레스토랑 다이닝"),
        ("수영장", "수영장"),
        ("피트니스", "피트니스"),
        ("스파", "스파"),
        ("주차", "주차"),
        ("체크인/아웃", "체크인 체크아웃"),
        ("객실", "객실"),
        ("요금/결제", "요금 결제"),
        ("반려동물", "반려동물"),
    ])
});

/// Retrieve's history-topic keyword priority list (breakfast > dining > pool > fitness
/// > spa > parking > checkin > rooms > pricing > pet). Walked in this fixed order.
pub static RETRIEVE_TOPIC_PRIORITY: &[(&str, &[&str])] = &[
    ("조식", &["조식", "아침식사", "breakfast"]),
    ("다이닝", &["레스토랑", "다이닝", "식당"]),
    ("수영장", &["수영장", "풀", "pool"]),
    ("피트니스", &["피트니스", "헬스", "gym"]),
    ("스파", &["스파", "spa", "사우나"]),
    ("주차", &["주차", "parking"]),
    ("체크인/아웃", &["체크인", "체크아웃"]),
    ("객실", &["객실", "방", "룸"]),
    ("요금/결제", &["요금", "가격", "비용"]),
    ("반려동물", &["반려동물", "애견", "펫", "pet"]),
];

/// Synonym expansion entries, declared order preserved; `retrieve` appends up to 3,
/// longest-matching entry only, skipping tokens already present in the query.
pub static SYNONYM_DICT: Lazy<HashMap<&'static str, Vec<&'static str>>> = Lazy::new(|| {
    HashMap::from([
        ("조식", vec!["아침식사", "모닝뷔페"]),
        ("수영장", vec!["풀", "워터파크"]),
        ("주차", vec!["발렛파킹", "주차장"]),
        ("체크인", vec!["입실"]),
        ("체크아웃", vec!["퇴실"]),
        ("반려동물", vec!["애견", "펫"]),
        ("피트니스", vec!["헬스장", "짐"]),
    ])
});

pub const MIN_QUERY_LENGTH: usize = 2;

/// Queries matching any of these are rejected outright, before the keyword gate.
pub static INVALID_QUERY_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    vec![
        Regex::new(r"(?i)^(ㅋㅋ+|ㅎㅎ+|ㅇㅇ|test|테스트)$").unwrap(),
        Regex::new(r"^[0-9\s]+$").unwrap(),
    ]
});

/// A query with no history must contain at least one of these keywords to be
/// considered hotel-domain-related (single-char keywords go through the word-boundary
/// rule in `korean::keyword_matches`).
pub static VALID_QUERY_KEYWORDS: &[&str] = &[
    "호텔", "객실", "방", "룸", "조식", "레스토랑", "식당", "수영장", "피트니스", "스파",
    "주차", "체크인", "체크아웃", "예약", "반려동물", "웨딩", "연회", "전화", "위치", "요금",
    "가격", "패키지", "프로모션",
];

/// Sensitive-token patterns used by the grounding gate's numeric/claim verification.
/// Grounded on `rag/grounding.py::SENSITIVE_PATTERNS`.
pub static SENSITIVE_PATTERNS: Lazy<Vec<(Regex, &'static str)>> = Lazy::new(|| {
    vec![
        (Regex::new(r"\d[\d,]*\s*원").unwrap(), "가격"),
        (Regex::new(r"\d+\s*%").unwrap(), "할인율"),
        (Regex::new(r"\d+\s*세").unwrap(), "연령"),
        (Regex::new(r"\d+\s*인").unwrap(), "인원"),
        (Regex::new(r"\d+\s*명").unwrap(), "인원"),
        (Regex::new(r"\d+\s*kg").unwrap(), "무게"),
        (Regex::new(r"\d{1,2}:\d{2}").unwrap(), "시간"),
        (Regex::new(r"무료").unwrap(), "무료"),
        (Regex::new(r"유료").unwrap(), "유료"),
        (Regex::new(r"할인").unwrap(), "할인"),
    ]
});

/// Keywords that trigger an immediate refusal when present in the user's *query*
/// (policyFilter step 1 / EntityResolver's personal-info gate).
pub static FORBIDDEN_KEYWORDS: &[&str] = &[
    "예약번호", "카드번호", "주민등록번호", "계좌번호", "비밀번호", "cvc", "카드 비밀번호",
];

/// Answer-level format fabrication patterns, distinct from the claim-level
/// `SENSITIVE_PATTERNS` table above: each matches a specific high-risk *format* rather
/// than a bare numeric category, and is checked once against the whole composed answer
/// (not per-claim). A match whose exact text is absent from the retrieved context is
/// flagged as suspicious by `verify::check_hallucination`. Grounded on
/// `rag/verify.py::checkHallucination`'s `SUSPICIOUS_PATTERNS` import from
/// `rag/constants.py` (not present in the retrieval pack — authored fresh per the
/// usage shown at `rag/verify.py`'s call site; see DESIGN.md).
pub static SUSPICIOUS_PATTERNS: Lazy<Vec<(Regex, &'static str)>> = Lazy::new(|| {
    vec![
        (Regex::new(r"\d{3,4}호(?:실)?").unwrap(), "객실 번호"),
        (Regex::new(r"\d{4}[- ]?\d{4}[- ]?\d{4}[- ]?\d{4}").unwrap(), "카드 번호"),
        (Regex::new(r"[A-Z]{2}\d{3,4}편").unwrap(), "항공편 번호"),
        (Regex::new(r"\d+\s*~\s*\d+\s*%").unwrap(), "할인율 범위"),
        (Regex::new(r"\d+\s*~\s*\d+\s*층").unwrap(), "층수 범위"),
    ]
});

pub struct AmbiguousPattern {
    pub keywords: &'static [&'static str],
    pub excludes: &'static [&'static str],
    pub question: &'static str,
    pub options: &'static [&'static str],
}

/// clarificationCheck's general ambiguous-pattern table, keyed by topic. "교통"
/// (transport) is checked with priority over specific-target short-circuiting.
pub static AMBIGUOUS_PATTERNS: Lazy<HashMap<&'static str, AmbiguousPattern>> = Lazy::new(|| {
    HashMap::from([
        (
            "교통",
            AmbiguousPattern {
                keywords: &["가는 방법", "오시는 길", "오시는길", "어떻게 가", "찾아가는", "교통편"],
                excludes: &["수영장", "피트니스", "체크인"],
                question: "어느 호텔로 가는 방법을 안내해 드릴까요?",
                options: &["조선 팰리스", "그랜드 조선 부산", "그랜드 조선 제주", "레스케이프", "그래비티 서울 판교"],
            },
        ),
        (
            "시간",
            AmbiguousPattern {
                keywords: &["몇 시", "몇시", "시간이 어떻게"],
                excludes: &["체크인", "체크아웃", "조식", "수영장", "피트니스"],
                question: "어떤 시설의 운영 시간이 궁금하신가요?",
                options: &["조식", "수영장", "피트니스", "스파"],
            },
        ),
        (
            "가격",
            AmbiguousPattern {
                keywords: &["얼마", "가격", "비용"],
                excludes: &["주차", "조식", "스파", "객실", "패키지"],
                question: "어떤 항목의 가격이 궁금하신가요?",
                options: &["객실 요금", "조식 가격", "스파 이용료"],
            },
        ),
    ])
});

pub struct ContextClarification {
    pub keywords: &'static [&'static str],
    pub direct_triggers: &'static [&'static str],
    pub question: &'static str,
    pub options: &'static [&'static str],
}

/// Context-aware clarification table — specific contexts (pets, children) that get a
/// tailored follow-up question unless the query already asks a direct question.
pub static CONTEXT_CLARIFICATION: Lazy<HashMap<&'static str, ContextClarification>> =
    Lazy::new(|| {
        HashMap::from([
            (
                "반려동물",
                ContextClarification {
                    keywords: &["반려동물", "애견", "강아지", "펫", "pet"],
                    direct_triggers: &["가능", "객실", "동반", "정책", "규정", "입장"],
                    question: "반려동물 동반 투숙에 대해 궁금하신 점이 객실 동반 가능 여부인가요, 추가 요금인가요?",
                    options: &["객실 동반 가능 여부", "추가 요금", "동반 가능 시설"],
                },
            ),
            (
                "어린이",
                ContextClarification {
                    keywords: &["어린이", "유아", "아이", "키즈"],
                    direct_triggers: &["가능", "키즈클럽", "요금", "시설"],
                    question: "어린이 관련해서 키즈클럽 이용을 안내해 드릴까요, 객실 구성을 안내해 드릴까요?",
                    options: &["키즈클럽 이용", "어린이 요금", "객실 구성"],
                },
            ),
        ])
    });

#[derive(Debug, Clone, Copy)]
pub struct RestaurantEntry {
    pub restaurant: &'static str,
    pub hotel_id: &'static str,
}

/// Restaurant name alias → list of (restaurant, hotel) entries, used by the entity
/// resolver. Aliases are matched longest-first by the caller.
pub static RESTAURANT_ALIAS_INDEX: Lazy<HashMap<&'static str, Vec<RestaurantEntry>>> =
    Lazy::new(|| {
        HashMap::from([
            (
                "아리아",
                vec![RestaurantEntry {
                    restaurant: "아리아(부산)",
                    hotel_id: "grand_josun_busan",
                }],
            ),
            (
                "콘스탄스",
                vec![RestaurantEntry {
                    restaurant: "콘스탄스",
                    hotel_id: "josun_palace",
                }],
            ),
            (
                "홍연",
                vec![RestaurantEntry {
                    restaurant: "홍연",
                    hotel_id: "josun_palace",
                }],
            ),
            (
                "팔레드신",
                vec![RestaurantEntry {
                    restaurant: "팔레드신(제주)",
                    hotel_id: "grand_josun_jeju",
                }],
            ),
        ])
    });

pub struct CategoryRule {
    pub warning: Option<&'static str>,
    pub always_include_updated_at: bool,
}

/// Per-category policy-formatting rule table (SPEC_FULL.md §1.1 supplement), driving
/// the "⚠️ warning" / "(정보 업데이트: ...)" lines policyFilter appends.
pub static CATEGORY_RULES: Lazy<HashMap<&'static str, CategoryRule>> = Lazy::new(|| {
    HashMap::from([
        (
            "요금/결제",
            CategoryRule {
                warning: Some("요금은 시즌/프로모션에 따라 변동될 수 있습니다."),
                always_include_updated_at: true,
            },
        ),
        (
            "반려동물",
            CategoryRule {
                warning: Some("반려동물 동반 정책은 사전 확인이 필요합니다."),
                always_include_updated_at: false,
            },
        ),
    ])
});

pub struct ExclusiveKeywords {
    pub own: &'static [&'static str],
    pub foreign: &'static [&'static str],
}

/// Per-category own/foreign keyword table for `CategoryConsistencyChecker`, grounded in
/// `rag/grounding.py::CategoryConsistencyChecker.EXCLUSIVE_KEYWORDS`. A sentence in an
/// answer fixed to one category is dropped if it contains a "foreign" keyword belonging
/// to another category's exclusive set.
pub static EXCLUSIVE_KEYWORDS: Lazy<HashMap<&'static str, ExclusiveKeywords>> = Lazy::new(|| {
    HashMap::from([
        (
            "조식",
            ExclusiveKeywords {
                own: &["조식", "breakfast", "뷔페", "아침", "아침식사", "모닝"],
                foreign: &[
                    "수영장", "풀", "pool", "피트니스", "헬스", "gym", "스파", "사우나", "주차",
                    "parking", "발렛", "19세", "성인", "입장료", "탈의실", "락커",
                ],
            },
        ),
        (
            "다이닝",
            ExclusiveKeywords {
                own: &["레스토랑", "식당", "다이닝", "저녁", "점심", "런치", "디너", "메뉴"],
                foreign: &[
                    "수영장", "풀", "pool", "피트니스", "헬스", "gym", "스파", "사우나", "주차",
                    "parking", "발렛", "19세", "성인", "입장료", "탈의실", "락커",
                ],
            },
        ),
        (
            "수영장",
            ExclusiveKeywords {
                own: &[
                    "수영", "수영장", "풀", "pool", "swimming", "물", "인피니티", "탈의실",
                    "락커", "수모", "수영복",
                ],
                foreign: &["조식", "breakfast", "뷔페", "아침식사", "주차", "parking", "발렛"],
            },
        ),
        (
            "부대시설",
            ExclusiveKeywords {
                own: &["수영", "수영장", "피트니스", "헬스", "사우나", "스파", "gym", "pool", "운동"],
                foreign: &["조식", "breakfast", "뷔페", "아침식사", "주차", "parking", "발렛"],
            },
        ),
        (
            "피트니스",
            ExclusiveKeywords {
                own: &["피트니스", "헬스", "gym", "fitness", "운동", "트레이닝", "기구"],
                foreign: &["조식", "breakfast", "뷔페", "수영장", "pool", "주차", "parking"],
            },
        ),
        (
            "스파",
            ExclusiveKeywords {
                own: &["스파", "spa", "마사지", "massage", "사우나", "트리트먼트", "테라피"],
                foreign: &["조식", "breakfast", "주차", "parking", "수영장", "pool"],
            },
        ),
        (
            "주차",
            ExclusiveKeywords {
                own: &["주차", "parking", "발렛", "valet", "파킹", "차량", "대"],
                foreign: &[
                    "조식", "breakfast", "뷔페", "수영장", "pool", "피트니스", "gym", "19세", "성인",
                ],
            },
        ),
        (
            "체크인/아웃",
            ExclusiveKeywords {
                own: &["체크인", "체크아웃", "입실", "퇴실", "check-in", "check-out", "시", "분"],
                foreign: &["수영장", "pool", "피트니스", "조식", "breakfast", "19세", "성인"],
            },
        ),
        (
            "객실",
            ExclusiveKeywords {
                own: &["객실", "방", "room", "침대", "bed", "뷰", "전망", "스위트", "디럭스"],
                foreign: &["수영장", "pool", "피트니스", "gym", "19세", "성인", "입장료"],
            },
        ),
        (
            "반려동물",
            ExclusiveKeywords {
                own: &["반려", "pet", "펫", "강아지", "반려견", "애견", "동물", "dog"],
                foreign: &["수영장", "pool", "조식", "breakfast", "19세", "성인"],
            },
        ),
    ])
});

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hotel_lookup() {
        assert_eq!(hotel_phone("josun_palace"), "02-727-7200");
    }

    #[test]
    fn test_hotel_lookup_missing_key() {
        assert_eq!(hotel_phone("nonexistent"), "호텔 고객센터");
    }

    #[test]
    fn test_five_hotels() {
        assert_eq!(HOTELS.len(), 5);
    }

    #[test]
    fn test_sensitive_patterns_price() {
        let (re, label) = &SENSITIVE_PATTERNS[0];
        assert_eq!(*label, "가격");
        assert!(re.is_match("50,000원"));
    }

    #[test]
    fn test_exclusive_keywords_breakfast_foreign_has_pool() {
        let rule = &EXCLUSIVE_KEYWORDS["조식"];
        assert!(rule.foreign.contains(&"수영장"));
        assert!(rule.own.contains(&"조식"));
    }

    #[test]
    fn test_suspicious_patterns_room_number() {
        let (re, label) = &SUSPICIOUS_PATTERNS[0];
        assert_eq!(*label, "객실 번호");
        assert!(re.is_match("1205호"));
    }
}
