/// Starter catalog inserted by the second migration, as `(category, content)`
/// in rotation order.
pub const SEED_QUESTIONS: &[(&str, &str)] = &[
    ("daily", "오늘 하루 중 가장 기분 좋았던 순간은 언제였나요?"),
    ("memories", "어렸을 때 가장 좋아했던 놀이는 무엇이었나요?"),
    ("family", "우리 가족만의 특별한 습관이 있다면 무엇일까요?"),
    ("dreams", "10년 뒤의 나는 어떤 모습일 것 같나요?"),
    ("feelings", "요즘 가장 자주 느끼는 감정은 무엇인가요?"),
    ("fun", "하루 동안 어떤 동물이 될 수 있다면 무엇이 되고 싶나요?"),
    ("daily", "오늘 먹은 음식 중 가장 맛있었던 것은 무엇인가요?"),
    ("memories", "가장 기억에 남는 가족 여행은 어디였나요?"),
    ("family", "서로에게 고마웠던 순간을 하나 이야기해 주세요."),
    ("dreams", "꼭 한 번 가보고 싶은 곳은 어디인가요?"),
    ("feelings", "최근에 속상했던 일이 있었나요? 어떻게 풀었나요?"),
    ("fun", "초능력 하나를 가질 수 있다면 무엇을 고르겠어요?"),
    ("daily", "요즘 가장 많이 듣는 노래는 무엇인가요?"),
    ("memories", "처음으로 혼자 해냈던 일은 무엇이었나요?"),
    ("family", "우리 가족을 한 단어로 표현한다면?"),
    ("dreams", "어른이 되면 꼭 해보고 싶은 일은 무엇인가요?"),
    ("feelings", "나를 가장 편안하게 만드는 것은 무엇인가요?"),
    ("fun", "가장 좋아하는 계절과 그 이유는 무엇인가요?"),
    ("daily", "이번 주에 가장 기대되는 일은 무엇인가요?"),
    ("memories", "학교 다닐 때 가장 좋아했던 선생님은 어떤 분이었나요?"),
    ("family", "함께 해보고 싶은 새로운 활동이 있나요?"),
    ("dreams", "나만의 가게를 연다면 무엇을 팔고 싶나요?"),
    ("feelings", "칭찬받았을 때 가장 기뻤던 순간은 언제인가요?"),
    ("fun", "타임머신이 있다면 과거와 미래 중 어디로 가고 싶나요?"),
    ("daily", "오늘 나를 웃게 만든 사람은 누구였나요?"),
    ("memories", "어릴 적 장래희망은 무엇이었나요?"),
    ("family", "상대방에게 배우고 싶은 점은 무엇인가요?"),
    ("dreams", "올해 꼭 이루고 싶은 목표가 있나요?"),
    ("feelings", "힘들 때 듣고 싶은 말은 무엇인가요?"),
    ("fun", "무인도에 세 가지만 가져갈 수 있다면 무엇을 챙길까요?"),
];
