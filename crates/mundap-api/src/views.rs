//! Row-to-DTO conversions shared by the handlers.

use std::collections::HashMap;

use chrono::NaiveDate;
use uuid::Uuid;

use mundap_crypto::{EncryptedField, PhoneVault, mask_phone};
use mundap_db::Store;
use mundap_db::models::{AnswerDetailRow, PairRow, QuestionRow, ReactionRow, UserRow};
use mundap_types::api::{
    AnswerEntry, AnswerView, PairView, PartnerView, QuestionAnswers, QuestionView, ReactionView,
    UserView,
};

use crate::error::AppResult;

pub fn user_view(phones: &PhoneVault, user: &UserRow) -> AppResult<UserView> {
    let phone = phones.open(&EncryptedField {
        ciphertext: user.phone_ciphertext.clone(),
        iv: user.phone_iv.clone(),
    })?;

    Ok(UserView {
        id: user.id,
        name: user.name.clone(),
        role: user.role,
        phone: mask_phone(&phone),
        status: user.status,
        created_at: user.created_at,
    })
}

pub fn question_view(q: &QuestionRow) -> QuestionView {
    QuestionView {
        id: q.id,
        content: q.content.clone(),
        category: q.category.clone(),
        order_num: q.order_num,
        is_active: q.is_active,
        created_at: q.created_at,
    }
}

/// `pair` as seen by `viewer`, with the other member summarized.
pub async fn pair_view(store: &dyn Store, pair: &PairRow, viewer: Uuid) -> AppResult<PairView> {
    let partner = match pair.partner_of(viewer) {
        Some(id) => store.find_user(id).await?.map(|u| PartnerView {
            id: u.id,
            name: u.name,
            role: u.role,
        }),
        None => None,
    };

    Ok(PairView {
        id: pair.id,
        status: pair.status,
        parent_id: pair.parent_id,
        child_id: pair.child_id,
        partner,
        invitation_expires_at: pair.invitation_expires_at,
        created_at: pair.created_at,
    })
}

pub fn reaction_view(r: ReactionRow) -> ReactionView {
    ReactionView {
        user_id: r.user_id,
        emoji: r.emoji,
        created_at: r.created_at,
    }
}

pub fn answer_view(detail: AnswerDetailRow, reactions: Vec<ReactionView>) -> AnswerView {
    let a = detail.answer;
    AnswerView {
        id: a.id,
        question_id: a.question_id,
        user_id: a.user_id,
        author_name: detail.author_name,
        author_role: detail.author_role,
        content: a.content,
        answered_at: a.answered_at,
        updated_at: a.updated_at,
        reactions,
    }
}

pub fn answer_entry(detail: AnswerDetailRow) -> AnswerEntry {
    let a = detail.answer;
    AnswerEntry {
        id: a.id,
        question_id: a.question_id,
        question_content: detail.question_content,
        category: detail.category,
        user_id: a.user_id,
        author_name: detail.author_name,
        author_role: detail.author_role,
        content: a.content,
        answered_at: a.answered_at,
    }
}

/// Attaches each answer's reactions, preserving answer order.
pub async fn with_reactions(
    store: &dyn Store,
    details: Vec<AnswerDetailRow>,
) -> AppResult<Vec<AnswerView>> {
    let ids: Vec<Uuid> = details.iter().map(|d| d.answer.id).collect();
    let mut by_answer: HashMap<Uuid, Vec<ReactionView>> = HashMap::new();
    if !ids.is_empty() {
        for r in store.reactions_for_answers(&ids).await? {
            by_answer.entry(r.answer_id).or_default().push(reaction_view(r));
        }
    }

    Ok(details
        .into_iter()
        .map(|d| {
            let reactions = by_answer.remove(&d.answer.id).unwrap_or_default();
            answer_view(d, reactions)
        })
        .collect())
}

/// Splits a question's answers into the viewer's and the partner's.
pub fn split_answers(
    answers: &[AnswerView],
    viewer: Uuid,
) -> (Option<AnswerView>, Option<AnswerView>) {
    let mine = answers.iter().find(|a| a.user_id == viewer).cloned();
    let partner = answers.iter().find(|a| a.user_id != viewer).cloned();
    (mine, partner)
}

/// A question with everything `viewer`'s pair said about it.
pub async fn question_answers(
    store: &dyn Store,
    pair: &PairRow,
    viewer: Uuid,
    question: &QuestionRow,
    date: Option<NaiveDate>,
) -> AppResult<QuestionAnswers> {
    let details = store.answers_for_questions(pair.id, &[question.id]).await?;
    let answers = with_reactions(store, details).await?;
    let (my_answer, partner_answer) = split_answers(&answers, viewer);
    let both_answered = my_answer.is_some() && partner_answer.is_some();

    Ok(QuestionAnswers {
        date,
        question: question_view(question),
        answers,
        my_answer,
        partner_answer,
        both_answered,
    })
}
