//! Built-in question bank used when no generator is configured or it fails.

use rand::seq::SliceRandom;

use crate::ai::GeneratedQuestion;

struct LocalQuestion {
    prompt: &'static str,
    answer: &'static str,
    distractors: [&'static str; 3],
}

const fn lq(prompt: &'static str, answer: &'static str, distractors: [&'static str; 3]) -> LocalQuestion {
    LocalQuestion {
        prompt,
        answer,
        distractors,
    }
}

const BANK: &[LocalQuestion] = &[
    lq("How many months are in a year?", "12", ["10", "11", "13"]),
    lq("How many days are in a week?", "7", ["5", "6", "8"]),
    lq("In which direction does the sun rise?", "East", ["West", "South", "North"]),
    lq("What is the chemical formula of water?", "H2O", ["CO2", "O2", "NaCl"]),
    lq("Which is the largest ocean on Earth?", "Pacific", ["Atlantic", "Indian", "Arctic"]),
    lq("What is the first color of the rainbow?", "Red", ["Orange", "Yellow", "Green"]),
    lq("How many hearts does a human have?", "1", ["2", "3", "4"]),
    lq("Which is the largest planet?", "Jupiter", ["Saturn", "Uranus", "Neptune"]),
    lq("Which of these is a mammal?", "Dog", ["Fish", "Sparrow", "Snake"]),
    lq("Which of these is a fruit?", "Apple", ["Carrot", "Potato", "Onion"]),
    lq("Which of these is a vehicle?", "Car", ["Table", "Chair", "Bed"]),
    lq("Which of these is not a planet?", "Moon", ["Earth", "Mars", "Venus"]),
    lq("Which of these is not a fruit?", "Carrot", ["Apple", "Banana", "Orange"]),
    lq("Which of these is not a color?", "Seven", ["Red", "Blue", "Green"]),
    lq("Which of these is not a metal?", "Wood", ["Iron", "Copper", "Aluminium"]),
    lq("Which of these is not a drink?", "Rice", ["Water", "Tea", "Coffee"]),
    lq("Which of these is not a sport?", "Sleeping", ["Running", "Swimming", "Basketball"]),
    lq("Which of these is not a season?", "Monday", ["Spring", "Summer", "Autumn"]),
    lq("Which of these is not a bird?", "Cat", ["Sparrow", "Pigeon", "Swallow"]),
    lq("What is 3 + 4?", "7", ["6", "8", "12"]),
];

/// Pick a random question from the bank.
pub fn random_question() -> GeneratedQuestion {
    let mut rng = rand::thread_rng();
    // BANK is non-empty.
    let q = BANK.choose(&mut rng).unwrap_or(&BANK[0]);
    GeneratedQuestion {
        prompt: q.prompt.to_string(),
        correct_answer: q.answer.to_string(),
        distractors: q.distractors.iter().map(|s| s.to_string()).collect(),
    }
}
