#![forbid(unsafe_code)]

//! Literal constructors for object sources.

/// Build a map [`Obj`](crate::Obj) from `key => value` pairs.
///
/// # Examples
///
/// ```ignore
/// let user = obj! {
///     "name" => "ada",
///     "age" => 36,
///     "tags" => list!["pioneer", "mathematician"],
/// };
/// assert_eq!(user.keys(), vec!["name", "age", "tags"]);
/// ```
#[macro_export]
macro_rules! obj {
    () => {
        $crate::Obj::map()
    };
    ($($key:expr => $value:expr),+ $(,)?) => {{
        let source = $crate::Obj::map();
        $(
            // Infallible: a freshly built map source accepts any entry.
            let _ = source.insert($key, $value);
        )+
        source
    }};
}

/// Build a list [`Obj`](crate::Obj) from items.
///
/// # Examples
///
/// ```ignore
/// let numbers = list![1, 2, 3];
/// assert_eq!(numbers.len(), 3);
/// ```
#[macro_export]
macro_rules! list {
    () => {
        $crate::Obj::list()
    };
    ($($item:expr),+ $(,)?) => {{
        let source = $crate::Obj::list();
        $(
            let _ = source.push($item);
        )+
        source
    }};
}

#[cfg(test)]
mod tests {
    use crate::value::Value;

    #[test]
    fn obj_macro_builds_ordered_maps() {
        let o = obj! {
            "b" => 1,
            "a" => "two",
            "nested" => obj! { "x" => true },
        };
        assert_eq!(o.keys(), vec!["b", "a", "nested"]);
        assert_eq!(o.get("a"), Some(Value::from("two")));
        let nested = o.get("nested").unwrap();
        assert_eq!(
            nested.as_obj().unwrap().shuck().get("x"),
            Some(Value::from(true))
        );
    }

    #[test]
    fn list_macro_builds_lists() {
        let l = list![1, 2, 3];
        assert!(l.is_list());
        assert_eq!(l.len(), 3);
        assert_eq!(l.at(2), Some(Value::from(3)));
    }

    #[test]
    fn empty_literals() {
        assert!(obj! {}.is_empty());
        assert!(list![].is_empty());
        assert!(list![].is_list());
    }
}
